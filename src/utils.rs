use sha2::{Digest, Sha224, Sha256};

// ========== Password utilities ==========

/// Hash password using SHA224
pub fn hash_password(password: &str) -> [u8; 28] {
    let mut hasher = Sha224::new();
    hasher.update(password.as_bytes());
    let result = hasher.finalize();
    let mut hash = [0u8; 28];
    hash.copy_from_slice(&result);
    hash
}

/// Convert password to the 56-byte hex secret carried by trojan requests
pub fn password_to_hex(password: &str) -> [u8; 56] {
    let hash = hash_password(password);
    let hex_string = hex::encode(hash);
    let mut hex_bytes: [u8; 56] = [0u8; 56];
    hex_bytes.copy_from_slice(hex_string.as_bytes());
    hex_bytes
}

/// Derive the 16-byte key carried by sower frames (truncated SHA256)
pub fn password_to_key(password: &str) -> [u8; 16] {
    let digest = Sha256::digest(password.as_bytes());
    let mut key = [0u8; 16];
    key.copy_from_slice(&digest[..16]);
    key
}

/// Split "host:port", "[v6]:port" or a bare host into its parts
pub fn split_host_port(addr: &str, default_port: u16) -> Option<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = match tail.strip_prefix(':') {
            Some(p) => p.parse().ok()?,
            None if tail.is_empty() => default_port,
            None => return None,
        };
        return Some((host.to_string(), port));
    }

    match addr.rsplit_once(':') {
        // more than one colon without brackets: a bare IPv6 literal
        Some((host, _)) if host.contains(':') => Some((addr.to_string(), default_port)),
        Some((host, port)) => Some((host.to_string(), port.parse().ok()?)),
        None => Some((addr.to_string(), default_port)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_password_produces_28_bytes() {
        let hash = hash_password("test_password");
        assert_eq!(hash.len(), 28);
    }

    #[test]
    fn test_hash_password_different_inputs() {
        assert_ne!(hash_password("password1"), hash_password("password2"));
    }

    #[test]
    fn test_password_to_hex_valid_hex_chars() {
        let hex_bytes = password_to_hex("test_password");
        for &byte in &hex_bytes {
            let c = byte as char;
            assert!(c.is_ascii_hexdigit(), "Expected hex digit, got: {}", c);
        }
    }

    #[test]
    fn test_password_to_hex_known_value() {
        // SHA224("password") = d63dc919e201d7bc4c825630d2cf25fdc93d4b2f0d46706d29038d01
        let hex_bytes = password_to_hex("password");
        let hex_string = std::str::from_utf8(&hex_bytes).unwrap();
        assert_eq!(
            hex_string,
            "d63dc919e201d7bc4c825630d2cf25fdc93d4b2f0d46706d29038d01"
        );
    }

    #[test]
    fn test_password_to_hex_unicode() {
        let hex_bytes = password_to_hex("密码");
        assert_eq!(hex_bytes.len(), 56);
        for &byte in &hex_bytes {
            assert!((byte as char).is_ascii_hexdigit());
        }
    }

    #[test]
    fn test_password_to_key_known_value() {
        // SHA256("password") = 5e884898da28047151d0e56f8dc62927...
        let key = password_to_key("password");
        assert_eq!(hex::encode(key), "5e884898da28047151d0e56f8dc62927");
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(
            split_host_port("proxy.com", 443),
            Some(("proxy.com".to_string(), 443))
        );
        assert_eq!(
            split_host_port("127.0.0.1:7890", 443),
            Some(("127.0.0.1".to_string(), 7890))
        );
        assert_eq!(
            split_host_port("[::1]:22", 443),
            Some(("::1".to_string(), 22))
        );
        assert_eq!(split_host_port("[::1]", 80), Some(("::1".to_string(), 80)));
        assert_eq!(
            split_host_port("2001:db8::1", 80),
            Some(("2001:db8::1".to_string(), 80))
        );
        assert_eq!(split_host_port("host:notaport", 80), None);
        assert_eq!(split_host_port("[::1]x", 80), None);
    }

    #[test]
    fn test_split_host_port_empty_port_rejected() {
        assert_eq!(split_host_port("example.com:", 80), None);
    }
}
