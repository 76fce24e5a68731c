use std::{process::Stdio, time::Duration};

use tokio::{fs, process::Command};
use tracing::debug;
use vellum_core::{Result, err, utils::random_string};

/// Run a configured external helper over source bytes. The argv template
/// names `{input}`; output is read from stdout unless the template names
/// `{output}`, in which case that file is read after exit. The helper is
/// killed at the timeout and its output is byte-capped.
pub(super) async fn run(
	argv: &[String],
	input: &[u8],
	timeout: Duration,
	output_limit: usize,
) -> Result<Vec<u8>> {
	let Some(program) = argv.first() else {
		return Err(err!(Request(InvalidParam(
			"No helper is configured for this content type"
		))));
	};

	let tmp = std::env::temp_dir();
	let input_path = tmp.join(format!("vellum-helper-in-{}", random_string(16)));
	// helpers that write a file pick their codec from the extension
	let output_path = tmp.join(format!("vellum-helper-out-{}.png", random_string(16)));
	let wants_output_file = argv.iter().any(|arg| arg.contains("{output}"));

	fs::write(&input_path, input).await?;

	let args: Vec<String> = argv[1..]
		.iter()
		.map(|arg| {
			arg.replace("{input}", &input_path.to_string_lossy())
				.replace("{output}", &output_path.to_string_lossy())
		})
		.collect();

	debug!(%program, ?args, "Running thumbnail helper");

	let result = async {
		let child = Command::new(program)
			.args(&args)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::null())
			.kill_on_drop(true)
			.spawn()
			.map_err(|e| err!("Helper {program:?} failed to start: {e}"))?;

		let output = tokio::time::timeout(timeout, child.wait_with_output())
			.await
			.map_err(|_| err!("Helper {program:?} timed out after {timeout:?}"))??;

		if !output.status.success() {
			return Err(err!("Helper {program:?} exited with {}", output.status));
		}

		let bytes = if wants_output_file {
			fs::read(&output_path).await?
		} else {
			output.stdout
		};

		if bytes.len() > output_limit {
			return Err(err!(Request(TooLarge(
				"Helper output of {} bytes exceeds the {output_limit} byte cap",
				bytes.len(),
			))));
		}

		if bytes.is_empty() {
			return Err(err!("Helper {program:?} produced no output"));
		}

		Ok(bytes)
	}
	.await;

	fs::remove_file(&input_path).await.ok();
	if wants_output_file {
		fs::remove_file(&output_path).await.ok();
	}

	result
}
