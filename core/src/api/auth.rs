//! Bearer-token authorization: RS256 JWTs carrying a `scopes` claim.

use axum::http::{header::AUTHORIZATION, HeaderMap};
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use super::error::ApiError;

#[derive(Deserialize, Debug)]
pub struct Claims {
	pub iss: String,
	pub iat: i64,
	#[serde(default)]
	pub exp: Option<i64>,
	#[serde(default)]
	pub scopes: Vec<String>,
}

pub struct AuthVerifier {
	decoding_key: DecodingKey,
	validation: Validation,
}

impl AuthVerifier {
	/// Builds a verifier from a PEM-encoded RSA public key and the expected
	/// issuer.
	pub fn from_rsa_pem(pem: &[u8], issuer: &str) -> Result<Self, jsonwebtoken::errors::Error> {
		let mut validation = Validation::new(Algorithm::RS256);
		// Tokens minted with `--expires-in never` carry no exp claim; expiry
		// is checked manually in `verify` when present.
		validation.validate_exp = false;
		validation.required_spec_claims.clear();
		validation.set_issuer(&[issuer]);

		Ok(Self {
			decoding_key: DecodingKey::from_rsa_pem(pem)?,
			validation,
		})
	}

	/// Passes when the bearer token is valid and holds any of the needed
	/// scopes. Missing or invalid token is 401, insufficient scopes 403.
	pub fn authorize(
		&self,
		headers: &HeaderMap,
		any_of_needed_scopes: &[&str],
	) -> Result<Claims, ApiError> {
		let token = headers
			.get(AUTHORIZATION)
			.and_then(|value| value.to_str().ok())
			.and_then(|value| value.strip_prefix("Bearer "))
			.ok_or(ApiError::Unauthorized)?;

		let claims = self.verify(token)?;

		if claims
			.scopes
			.iter()
			.any(|scope| any_of_needed_scopes.contains(&scope.as_str()))
		{
			Ok(claims)
		} else {
			Err(ApiError::Forbidden)
		}
	}

	fn verify(&self, token: &str) -> Result<Claims, ApiError> {
		let data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)
			.map_err(|_| ApiError::Unauthorized)?;

		if let Some(exp) = data.claims.exp {
			if exp < Utc::now().timestamp() {
				return Err(ApiError::Unauthorized);
			}
		}

		Ok(data.claims)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn missing_bearer_is_unauthorized() {
		let verifier = AuthVerifier {
			decoding_key: DecodingKey::from_secret(b"unused"),
			validation: Validation::new(Algorithm::RS256),
		};

		let headers = HeaderMap::new();
		assert!(matches!(
			verifier.authorize(&headers, &["extension:read"]),
			Err(ApiError::Unauthorized)
		));
	}

	#[test]
	fn garbage_token_is_unauthorized() {
		let verifier = AuthVerifier {
			decoding_key: DecodingKey::from_secret(b"unused"),
			validation: Validation::new(Algorithm::RS256),
		};

		let mut headers = HeaderMap::new();
		headers.insert(AUTHORIZATION, "Bearer not-a-jwt".parse().unwrap());

		assert!(matches!(
			verifier.authorize(&headers, &["extension:read"]),
			Err(ApiError::Unauthorized)
		));
	}
}
