/// Generate a new license key: 16 random bytes, hex-encoded, uppercased.
/// 32 characters, 128 bits of entropy, no embedded sequence information —
/// collisions are negligible for the lifetime of a store.
pub fn generate_license_key() -> String {
    use rand::Rng;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes).to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn key_is_32_uppercase_hex_chars() {
        let key = generate_license_key();
        assert_eq!(key.len(), 32);
        assert!(key
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
    }

    #[test]
    fn keys_do_not_repeat() {
        let keys: HashSet<String> = (0..1_000).map(|_| generate_license_key()).collect();
        assert_eq!(keys.len(), 1_000);
    }
}
