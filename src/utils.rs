use rand::Rng;

/// Stable client prefix for generated peer ids.
const PEER_ID_PREFIX: &[u8; 10] = b"-TRRNTIAL-";

/// Generates a 20-byte peer id: the client prefix followed by ten random
/// decimal digits. Generated once per session.
pub fn generate_peer_id() -> [u8; 20] {
    let mut rng = rand::thread_rng();
    let mut id = [0u8; 20];
    id[..10].copy_from_slice(PEER_ID_PREFIX);
    for byte in &mut id[10..] {
        *byte = b'0' + rng.gen_range(0..10u8);
    }
    id
}

/// The peer id as a string slice. Ids built by [`generate_peer_id`] are
/// always printable ASCII.
pub fn peer_id_str(id: &[u8; 20]) -> &str {
    std::str::from_utf8(id).expect("peer id is ascii")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_shape() {
        let id = generate_peer_id();
        assert_eq!(id.len(), 20);
        assert_eq!(&id[..10], PEER_ID_PREFIX);
        assert!(id[10..].iter().all(|b| b.is_ascii_digit()));
    }
}
