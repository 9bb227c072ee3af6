use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::{rngs::OsRng, Rng};
use tracing::error;

pub const CODE_LENGTH: usize = 6;

/// Uniformly random numeric code of `CODE_LENGTH` digits, leading zeros kept.
pub fn generate_code() -> String {
    let n: u32 = OsRng.gen_range(0..10u32.pow(CODE_LENGTH as u32));
    format!("{:0width$}", n, width = CODE_LENGTH)
}

pub fn is_well_formed(code: &str) -> bool {
    code.len() == CODE_LENGTH && code.bytes().all(|b| b.is_ascii_digit())
}

// 8 MiB, 2 passes. Lighter than the password defaults.
fn hasher() -> anyhow::Result<Argon2<'static>> {
    let params = Params::new(8 * 1024, 2, 1, None).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

pub fn hash_code(code: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = hasher()?
        .hash_password(code.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_code error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

pub fn verify_code(code: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(hasher()?.verify_password(code.as_bytes(), &parsed).is_ok())
}

/// Runs `hash_code` on the blocking pool.
pub async fn hash_code_blocking(code: String) -> anyhow::Result<String> {
    tokio::task::spawn_blocking(move || hash_code(&code)).await?
}

/// Runs `verify_code` on the blocking pool.
pub async fn verify_code_blocking(code: String, hash: String) -> anyhow::Result<bool> {
    tokio::task::spawn_blocking(move || verify_code(&code, &hash)).await?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_six_digits() {
        for _ in 0..200 {
            let code = generate_code();
            assert!(is_well_formed(&code), "bad code {code}");
        }
    }

    #[test]
    fn well_formed_rejects_letters_and_wrong_length() {
        assert!(is_well_formed("012345"));
        assert!(!is_well_formed("12345"));
        assert!(!is_well_formed("1234567"));
        assert!(!is_well_formed("12a456"));
        assert!(!is_well_formed(""));
    }

    #[test]
    fn hash_and_verify_roundtrip() {
        let hash = hash_code("482913").expect("hashing should succeed");
        assert!(!hash.contains("482913"));
        assert!(verify_code("482913", &hash).expect("verify should succeed"));
        assert!(!verify_code("482914", &hash).expect("verify should not error"));
    }

    #[test]
    fn verify_errors_on_malformed_hash() {
        let err = verify_code("123456", "not-a-valid-hash").unwrap_err();
        assert!(!err.to_string().is_empty());
    }

    #[tokio::test]
    async fn blocking_helpers_agree_with_sync_versions() {
        let hash = hash_code_blocking("000111".into()).await.unwrap();
        assert!(verify_code_blocking("000111".into(), hash).await.unwrap());
    }
}
