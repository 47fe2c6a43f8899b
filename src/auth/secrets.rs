use rand::distributions::Uniform;
use rand::{thread_rng, Rng, RngCore};
use sha2::{Digest, Sha256};

/// Byte length of raw refresh-token secrets.
pub const REFRESH_SECRET_BYTES: usize = 40;

/// Generate a raw refresh-token secret as lowercase hex.
pub fn refresh_secret() -> String {
    let mut bytes = [0u8; REFRESH_SECRET_BYTES];
    thread_rng().fill_bytes(&mut bytes);
    to_hex(&bytes)
}

/// Generate a high-entropy link token (magic link, recovery, confirmation).
pub fn link_token() -> String {
    let mut bytes = [0u8; 32];
    thread_rng().fill_bytes(&mut bytes);
    to_hex(&bytes)
}

/// Generate a short challenge code from the given charset.
pub fn challenge_code(charset: &str, length: usize) -> String {
    let chars: Vec<char> = charset.chars().collect();
    if chars.is_empty() || length == 0 {
        return String::new();
    }
    let dist = Uniform::from(0..chars.len());
    let mut rng = thread_rng();
    (0..length).map(|_| chars[rng.sample(dist)]).collect()
}

/// SHA-256 hex digest. Secrets are only ever persisted in this form.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_secrets_are_distinct_and_sized() {
        let a = refresh_secret();
        let b = refresh_secret();
        assert_ne!(a, b);
        assert_eq!(a.len(), REFRESH_SECRET_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn digest_is_stable() {
        // Issuance-time digest equals verification-time digest for the same raw token.
        let raw = link_token();
        assert_eq!(sha256_hex(&raw), sha256_hex(&raw));
        assert_eq!(sha256_hex(&raw).len(), 64);
    }

    #[test]
    fn known_digest() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn challenge_codes_respect_charset_and_length() {
        let code = challenge_code("0123456789", 6);
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));

        assert_eq!(challenge_code("", 6), "");
        assert_eq!(challenge_code("abc", 0), "");
    }
}
