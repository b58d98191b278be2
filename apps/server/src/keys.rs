//! Key-pair generation and token minting for the API's bearer auth.

use std::path::PathBuf;

use anyhow::Context;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rsa::{
	pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding},
	RsaPrivateKey, RsaPublicKey,
};
use serde::Serialize;

#[derive(clap::Args)]
pub struct GenerateKeysetArgs {
	/// Base filename; writes `<filename>.rsa` and `<filename>.rsa.pub`
	#[arg(long, default_value = "key")]
	pub filename: String,

	#[arg(long, default_value_t = 4096)]
	pub bit_size: usize,

	/// Overwrite an existing key pair
	#[arg(long)]
	pub force: bool,
}

pub fn generate_keyset(args: &GenerateKeysetArgs) -> anyhow::Result<()> {
	let private_key_path = PathBuf::from(format!("{}.rsa", args.filename));
	let public_key_path = PathBuf::from(format!("{}.rsa.pub", args.filename));

	// An existing key pair is left alone unless forced.
	if private_key_path.exists() && !args.force {
		return Ok(());
	}

	let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), args.bit_size)
		.context("failed to generate RSA key")?;
	let public_key = RsaPublicKey::from(&private_key);

	let private_pem = private_key
		.to_pkcs1_pem(LineEnding::LF)
		.context("failed to encode private key")?;
	let public_pem = public_key
		.to_pkcs1_pem(LineEnding::LF)
		.context("failed to encode public key")?;

	write_key(&private_key_path, private_pem.as_bytes(), 0o700)?;
	write_key(&public_key_path, public_pem.as_bytes(), 0o755)?;

	Ok(())
}

fn write_key(path: &PathBuf, pem: &[u8], mode: u32) -> anyhow::Result<()> {
	std::fs::write(path, pem)
		.with_context(|| format!("failed to write key to {}", path.display()))?;

	#[cfg(unix)]
	{
		use std::os::unix::fs::PermissionsExt;
		std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
			.with_context(|| format!("failed to set permissions on {}", path.display()))?;
	}

	Ok(())
}

#[derive(clap::Args)]
pub struct GenerateJwtArgs {
	/// PEM file holding the RSA private key
	#[arg(long, default_value = "key.rsa")]
	pub key: PathBuf,

	#[arg(long, default_value = "localhost:8080")]
	pub issuer: String,

	/// Expiry like `12h` or `30d`, or `never`
	#[arg(long, default_value = "never")]
	pub expires_in: String,
}

#[derive(Serialize)]
struct TokenClaims {
	iss: String,
	iat: i64,
	#[serde(skip_serializing_if = "Option::is_none")]
	exp: Option<i64>,
	scopes: Vec<String>,
}

pub fn generate_jwt(args: &GenerateJwtArgs) -> anyhow::Result<()> {
	let pem = std::fs::read(&args.key)
		.with_context(|| format!("failed to read private key from {}", args.key.display()))?;
	let encoding_key =
		EncodingKey::from_rsa_pem(&pem).context("failed to parse private key")?;

	let now = chrono::Utc::now();
	let exp = if args.expires_in == "never" {
		None
	} else {
		let lifetime = crate::utils::parse_duration(&args.expires_in)
			.map_err(|e| anyhow::anyhow!("failed to parse expires-in: {e}"))?;
		Some(now.timestamp() + lifetime.as_secs() as i64)
	};

	let claims = TokenClaims {
		iss: args.issuer.clone(),
		iat: now.timestamp(),
		exp,
		scopes: vec!["extension:read".to_string()],
	};

	let token = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
		.context("failed to sign token")?;

	println!("{token}");

	Ok(())
}
