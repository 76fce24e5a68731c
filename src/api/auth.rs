//! Token validation adapters. Real identity-server integration is an
//! external collaborator; these extractors check against the statically
//! configured token maps.

use axum::extract::FromRequestParts;
use http::{header::AUTHORIZATION, request::Parts};
use ruma::OwnedUserId;
use vellum_core::{Error, Result, err};

/// An authenticated client user, from `Authorization: Bearer`.
pub(crate) struct AuthedUser(pub(crate) OwnedUserId);

/// An authenticated admin token.
pub(crate) struct Admin;

/// An authenticated federation peer, when a shared secret is configured.
pub(crate) struct Peer;

fn bearer_of(headers: &http::HeaderMap) -> Result<&str> {
	headers
		.get(AUTHORIZATION)
		.and_then(|value| value.to_str().ok())
		.and_then(|value| value.strip_prefix("Bearer "))
		.ok_or_else(|| err!(Request(MissingToken("Missing access token."))))
}

fn bearer(parts: &Parts) -> Result<&str> { bearer_of(&parts.headers) }

/// Best-effort identification for routes that may be anonymous. When the
/// configuration forbids unauthenticated downloads a valid token is
/// mandatory; otherwise a present-but-unknown token is still an error,
/// and an absent one is anonymity.
pub(crate) fn identify(
	state: &crate::State,
	headers: &http::HeaderMap,
) -> Result<Option<OwnedUserId>> {
	let config = &state.server.config;

	match bearer_of(headers) {
		| Ok(token) => config
			.access_tokens
			.get(token)
			.map(|user| Some(user.clone()))
			.ok_or_else(|| err!(Request(UnknownToken("Unrecognized access token.")))),
		| Err(e) =>
			if config.allow_unauthenticated_downloads {
				Ok(None)
			} else {
				Err(e)
			},
	}
}

impl FromRequestParts<crate::State> for AuthedUser {
	type Rejection = Error;

	async fn from_request_parts(
		parts: &mut Parts,
		state: &crate::State,
	) -> Result<Self, Self::Rejection> {
		let token = bearer(parts)?;

		state
			.server
			.config
			.access_tokens
			.get(token)
			.map(|user| Self(user.clone()))
			.ok_or_else(|| err!(Request(UnknownToken("Unrecognized access token."))))
	}
}

impl FromRequestParts<crate::State> for Admin {
	type Rejection = Error;

	async fn from_request_parts(
		parts: &mut Parts,
		state: &crate::State,
	) -> Result<Self, Self::Rejection> {
		let token = bearer(parts)?;

		state
			.server
			.config
			.admin_tokens
			.iter()
			.any(|admin| admin == token)
			.then_some(Self)
			.ok_or_else(|| err!(Request(Forbidden("Not an admin token."))))
	}
}

impl FromRequestParts<crate::State> for Peer {
	type Rejection = Error;

	async fn from_request_parts(
		parts: &mut Parts,
		state: &crate::State,
	) -> Result<Self, Self::Rejection> {
		let Some(secret) = &state.server.config.federation_shared_secret else {
			return Ok(Self);
		};

		let token = bearer(parts)?;
		if token == secret {
			Ok(Self)
		} else {
			Err(err!(Request(Forbidden("Federation secret mismatch."))))
		}
	}
}
