//! Cryptographic functions for the Security Manager Protocol
//!
//! Every value here is a little-endian byte array, least significant octet
//! first, exactly as it is carried in SMP PDUs. The AES block cipher works
//! on the most significant octet first, so `aes_encrypt` reverses on the way
//! in and on the way out and everything built on top of it stays in wire
//! order.

use super::constants::*;
use super::types::*;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use cmac::{Cmac, Mac};
use p256::elliptic_curve::sec1::{Coordinates, FromEncodedPoint, ToEncodedPoint};
use rand::{Rng, RngCore};

/// SALT for f5, least significant octet first
/// (0x6C888391_AAF5A538_60370BDB_5A6083BE).
const F5_SALT: [u8; 16] = [
    0xbe, 0x83, 0x60, 0x5a, 0xdb, 0x0b, 0x37, 0x60, 0x38, 0xa5, 0xf5, 0xaa, 0x91, 0x83, 0x88, 0x6c,
];

/// keyID "btle" used by f5.
const F5_KEY_ID: [u8; 4] = [0x65, 0x6c, 0x74, 0x62];

/// keyID "lebr": LE LTK to BR/EDR link key, second step.
pub const H6_KEY_ID_LEBR: [u8; 4] = [0x72, 0x62, 0x65, 0x6c];
/// keyID "brle": BR/EDR link key to LE LTK, second step.
pub const H6_KEY_ID_BRLE: [u8; 4] = [0x65, 0x6c, 0x72, 0x62];
/// keyID "tmp1": BR/EDR link key to LE LTK, first step.
pub const H6_KEY_ID_TMP1: [u8; 4] = [0x31, 0x70, 0x6d, 0x74];
/// keyID "tmp2": LE LTK to BR/EDR link key, first step.
pub const H6_KEY_ID_TMP2: [u8; 4] = [0x32, 0x70, 0x6d, 0x74];

/// P-256 debug public key, most significant octet first.
const DEBUG_PUBLIC_KEY_X: [u8; 32] = [
    0x20, 0xb0, 0x03, 0xd2, 0xf2, 0x97, 0xbe, 0x2c, 0x5e, 0x2c, 0x83, 0xa7, 0xe9, 0xf9, 0xa5, 0xb9,
    0xef, 0xf4, 0x91, 0x11, 0xac, 0xf4, 0xfd, 0xdb, 0xcc, 0x03, 0x01, 0x48, 0x0e, 0x35, 0x9d, 0xe6,
];
const DEBUG_PUBLIC_KEY_Y: [u8; 32] = [
    0xdc, 0x80, 0x9c, 0x49, 0x65, 0x2a, 0xeb, 0x6d, 0x63, 0x32, 0x9a, 0xbf, 0x5a, 0x52, 0x15, 0x5c,
    0x76, 0x63, 0x45, 0xc2, 0x8f, 0xed, 0x30, 0x24, 0x74, 0x1c, 0x8e, 0xd0, 0x15, 0x89, 0xd2, 0x8b,
];

/// Bounded retries when drawing a private key that is not a valid scalar.
const KEYPAIR_ATTEMPTS: usize = 8;

/// Generate a 128-bit random number
pub fn generate_random_128() -> [u8; 16] {
    let mut value = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut value);
    value
}

/// Generate a 64-bit random number
pub fn generate_random_64() -> [u8; 8] {
    let mut value = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut value);
    value
}

/// Generate a random passkey (0-999999)
pub fn generate_passkey() -> u32 {
    rand::thread_rng().gen_range(0..=SMP_PASSKEY_MAX)
}

/// Expand a six digit passkey into a 128-bit value (TK, or ra/rb in SC).
pub fn passkey_to_128(passkey: u32) -> [u8; 16] {
    let mut value = [0u8; 16];
    value[..4].copy_from_slice(&passkey.to_le_bytes());
    value
}

fn xor_128(a: &[u8; 16], b: &[u8; 16]) -> [u8; 16] {
    let mut out = [0u8; 16];
    for (o, (x, y)) in out.iter_mut().zip(a.iter().zip(b.iter())) {
        *o = x ^ y;
    }
    out
}

/// Security function e: AES-128 on little-endian key and plaintext.
pub fn aes_encrypt(key: &[u8; 16], plaintext: &[u8; 16]) -> [u8; 16] {
    let mut key_be = *key;
    key_be.reverse();
    let mut block_be = *plaintext;
    block_be.reverse();

    let cipher = Aes128::new(&key_be.into());
    let mut block = aes::Block::from(block_be);
    cipher.encrypt_block(&mut block);

    let mut out = [0u8; 16];
    out.copy_from_slice(&block);
    out.reverse();
    out
}

/// AES-CMAC (RFC 4493) over a little-endian message, truncated to the
/// `tlen` most significant octets of the tag.
pub fn aes_cipher_msg_auth_code(key: &[u8; 16], msg: &[u8], tlen: usize) -> SmpResult<Vec<u8>> {
    if tlen == 0 || tlen > BT_OCTET16_LEN {
        return Err(SmpError::InvalidParameter(format!(
            "CMAC tag length {} out of range",
            tlen
        )));
    }

    let mut key_be = *key;
    key_be.reverse();
    let mut msg_be: Vec<u8> = Vec::new();
    msg_be
        .try_reserve_exact(msg.len())
        .map_err(|_| SmpError::NoResources)?;
    msg_be.extend(msg.iter().rev());

    let mut mac = <Cmac<Aes128> as KeyInit>::new(&key_be.into());
    mac.update(&msg_be);
    let mut tag = [0u8; 16];
    tag.copy_from_slice(&mac.finalize().into_bytes());
    tag.reverse();

    Ok(tag[BT_OCTET16_LEN - tlen..].to_vec())
}

/// Full 128-bit AES-CMAC.
pub fn aes_cmac(key: &[u8; 16], msg: &[u8]) -> SmpResult<[u8; 16]> {
    let tag = aes_cipher_msg_auth_code(key, msg, BT_OCTET16_LEN)?;
    let mut out = [0u8; 16];
    out.copy_from_slice(&tag);
    Ok(out)
}

/// Confirm value generation function f4 (U || V || Z keyed with X).
pub fn f4(u: &[u8; 32], v: &[u8; 32], x: &[u8; 16], z: u8) -> SmpResult<[u8; 16]> {
    let mut msg = Vec::with_capacity(1 + 2 * BT_OCTET32_LEN);
    msg.push(z);
    msg.extend_from_slice(v);
    msg.extend_from_slice(u);
    aes_cmac(x, &msg)
}

/// Key generation function f5. Returns `(MacKey, LTK)`.
pub fn f5(
    w: &[u8; 32],
    n1: &[u8; 16],
    n2: &[u8; 16],
    a1: &[u8; 7],
    a2: &[u8; 7],
) -> SmpResult<([u8; 16], [u8; 16])> {
    let t = aes_cmac(&F5_SALT, w)?;

    let derive = |counter: u8| -> SmpResult<[u8; 16]> {
        let mut msg = Vec::with_capacity(53);
        msg.extend_from_slice(&[0x00, 0x01]);
        msg.extend_from_slice(a2);
        msg.extend_from_slice(a1);
        msg.extend_from_slice(n2);
        msg.extend_from_slice(n1);
        msg.extend_from_slice(&F5_KEY_ID);
        msg.push(counter);
        aes_cmac(&t, &msg)
    };

    Ok((derive(0)?, derive(1)?))
}

/// Check value generation function f6.
pub fn f6(
    w: &[u8; 16],
    n1: &[u8; 16],
    n2: &[u8; 16],
    r: &[u8; 16],
    io_cap: &[u8; 3],
    a1: &[u8; 7],
    a2: &[u8; 7],
) -> SmpResult<[u8; 16]> {
    let mut msg = Vec::with_capacity(65);
    msg.extend_from_slice(a2);
    msg.extend_from_slice(a1);
    msg.extend_from_slice(io_cap);
    msg.extend_from_slice(r);
    msg.extend_from_slice(n2);
    msg.extend_from_slice(n1);
    aes_cmac(w, &msg)
}

/// Numeric comparison value function g2, reduced to six digits.
pub fn g2(u: &[u8; 32], v: &[u8; 32], x: &[u8; 16], y: &[u8; 16]) -> SmpResult<u32> {
    let mut msg = Vec::with_capacity(BT_OCTET16_LEN + 2 * BT_OCTET32_LEN);
    msg.extend_from_slice(y);
    msg.extend_from_slice(v);
    msg.extend_from_slice(u);
    let tag = aes_cmac(x, &msg)?;
    let value = u32::from_le_bytes([tag[0], tag[1], tag[2], tag[3]]);
    Ok(value % (SMP_PASSKEY_MAX + 1))
}

/// Link key conversion function h6.
pub fn h6(w: &[u8; 16], key_id: &[u8; 4]) -> SmpResult<[u8; 16]> {
    aes_cmac(w, key_id)
}

/// Legacy confirm value generation function c1.
#[allow(clippy::too_many_arguments)]
pub fn c1(
    k: &[u8; 16],
    r: &[u8; 16],
    preq: &[u8; 7],
    pres: &[u8; 7],
    iat: u8,
    ia: &[u8; 6],
    rat: u8,
    ra: &[u8; 6],
) -> [u8; 16] {
    let mut p1 = [0u8; 16];
    p1[0] = iat;
    p1[1] = rat;
    p1[2..9].copy_from_slice(preq);
    p1[9..16].copy_from_slice(pres);

    let mut p2 = [0u8; 16];
    p2[0..6].copy_from_slice(ra);
    p2[6..12].copy_from_slice(ia);

    let first = aes_encrypt(k, &xor_128(r, &p1));
    aes_encrypt(k, &xor_128(&first, &p2))
}

/// Legacy STK generation function s1.
pub fn s1(k: &[u8; 16], r1: &[u8; 16], r2: &[u8; 16]) -> [u8; 16] {
    let mut r_prime = [0u8; 16];
    r_prime[..8].copy_from_slice(&r2[..8]);
    r_prime[8..].copy_from_slice(&r1[..8]);
    aes_encrypt(k, &r_prime)
}

/// Random address hash function ah.
pub fn ah(irk: &[u8; 16], r: &[u8; 3]) -> [u8; 3] {
    let mut r_prime = [0u8; 16];
    r_prime[..3].copy_from_slice(r);
    let out = aes_encrypt(irk, &r_prime);
    [out[0], out[1], out[2]]
}

/// Check whether a resolvable private address was generated from `irk`.
pub fn resolve_rpa(irk: &[u8; 16], addr: &[u8; 6]) -> bool {
    let prand = [addr[3], addr[4], addr[5]];
    if prand[2] & 0xc0 != 0x40 {
        return false;
    }
    ah(irk, &prand) == [addr[0], addr[1], addr[2]]
}

/// Mask a key down to the negotiated encryption key size.
pub fn mask_key(key: &mut [u8; 16], enc_size: u8) {
    let keep = usize::from(enc_size).min(BT_OCTET16_LEN);
    for byte in key.iter_mut().skip(keep) {
        *byte = 0;
    }
}

/// P-256 public key, both coordinates least significant octet first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublicKey {
    pub x: [u8; 32],
    pub y: [u8; 32],
}

impl PublicKey {
    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        let mut x = [0u8; 32];
        let mut y = [0u8; 32];
        x.copy_from_slice(&bytes[..32]);
        y.copy_from_slice(&bytes[32..]);
        Self { x, y }
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.x);
        out[32..].copy_from_slice(&self.y);
        out
    }

    fn be_coordinates(&self) -> ([u8; 32], [u8; 32]) {
        let mut x = self.x;
        let mut y = self.y;
        x.reverse();
        y.reverse();
        (x, y)
    }

    /// Whether this is the well-known debug key.
    pub fn is_debug(&self) -> bool {
        let (x, y) = self.be_coordinates();
        x == DEBUG_PUBLIC_KEY_X && y == DEBUG_PUBLIC_KEY_Y
    }
}

fn secret_scalar(private_key: &[u8; 32]) -> SmpResult<p256::NonZeroScalar> {
    let mut be = *private_key;
    be.reverse();
    Option::from(p256::NonZeroScalar::from_repr(be.into()))
        .ok_or_else(|| SmpError::CryptoError("invalid private key".into()))
}

/// Compute the public key for a little-endian private key.
pub fn public_key_from_private(private_key: &[u8; 32]) -> SmpResult<PublicKey> {
    let scalar = secret_scalar(private_key)?;
    let point = p256::PublicKey::from_secret_scalar(&scalar).to_encoded_point(false);
    match point.coordinates() {
        Coordinates::Uncompressed { x, y } => {
            let mut key = PublicKey::default();
            key.x.copy_from_slice(x);
            key.y.copy_from_slice(y);
            key.x.reverse();
            key.y.reverse();
            Ok(key)
        }
        _ => Err(SmpError::CryptoError("unexpected point encoding".into())),
    }
}

/// Generate a fresh P-256 key pair. Returns `(private_key, public_key)`.
pub fn generate_p256_keypair() -> SmpResult<([u8; 32], PublicKey)> {
    let mut rng = rand::thread_rng();
    for _ in 0..KEYPAIR_ATTEMPTS {
        let mut private_key = [0u8; 32];
        rng.fill_bytes(&mut private_key);
        if let Ok(public_key) = public_key_from_private(&private_key) {
            return Ok((private_key, public_key));
        }
    }
    Err(SmpError::CryptoError("failed to generate P-256 key pair".into()))
}

/// ECDH shared secret (DHKey), little-endian.
///
/// Rejects points that are not on the curve, the debug key, and a peer key
/// equal to our own.
pub fn compute_dhkey(private_key: &[u8; 32], peer: &PublicKey) -> SmpResult<[u8; 32]> {
    if peer.is_debug() {
        return Err(SmpError::CryptoError("peer sent the debug public key".into()));
    }

    let scalar = secret_scalar(private_key)?;
    let (x, y) = peer.be_coordinates();
    let encoded = p256::EncodedPoint::from_affine_coordinates(&x.into(), &y.into(), false);
    let remote: p256::PublicKey = Option::from(p256::PublicKey::from_encoded_point(&encoded))
        .ok_or_else(|| SmpError::CryptoError("peer public key is not on P-256".into()))?;
    if remote == p256::PublicKey::from_secret_scalar(&scalar) {
        return Err(SmpError::CryptoError("peer reflected our public key".into()));
    }

    let shared = p256::ecdh::diffie_hellman(&scalar, remote.as_affine());
    let mut dhkey = [0u8; 32];
    dhkey.copy_from_slice(shared.raw_secret_bytes());
    dhkey.reverse();
    Ok(dhkey)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Decode a most-significant-first hex string into a wire order array.
    fn le<const N: usize>(s: &str) -> [u8; N] {
        let mut out = [0u8; N];
        hex::decode_to_slice(s, &mut out).unwrap();
        out.reverse();
        out
    }

    const CMAC_KEY: &str = "2b7e151628aed2a6abf7158809cf4f3c";
    const CMAC_MSG: &str = "6bc1bee22e409f96e93d7e117393172a\
                            ae2d8a571e03ac9c9eb76fac45af8e51\
                            30c81c46a35ce411e5fbc1191a0a52ef\
                            f69f2445df4f9b17ad2b417be66c3710";

    fn cmac_case(msg_len: usize, expected: &str) {
        let key: [u8; 16] = le(CMAC_KEY);
        let mut msg = hex::decode(&CMAC_MSG[..msg_len * 2]).unwrap();
        msg.reverse();
        let tag = aes_cipher_msg_auth_code(&key, &msg, 16).unwrap();
        let expected: [u8; 16] = le(expected);
        assert_eq!(tag, expected.to_vec());
    }

    #[test]
    fn test_cmac_empty_message() {
        cmac_case(0, "bb1d6929e95937287fa37d129b756746");
    }

    #[test]
    fn test_cmac_one_block() {
        cmac_case(16, "070a16b46b4d4144f79bdd9dd04a287c");
    }

    #[test]
    fn test_cmac_partial_last_block() {
        cmac_case(40, "dfa66747de9ae63030ca32611497c827");
    }

    #[test]
    fn test_cmac_four_blocks() {
        cmac_case(64, "51f0bebf7e3b9d92fc49741779363cfe");
    }

    #[test]
    fn test_cmac_truncated_tag_is_most_significant() {
        let key: [u8; 16] = le(CMAC_KEY);
        let full = aes_cipher_msg_auth_code(&key, &[], 16).unwrap();
        let short = aes_cipher_msg_auth_code(&key, &[], 4).unwrap();
        assert_eq!(short, full[12..].to_vec());
    }

    #[test]
    fn test_cmac_rejects_bad_tag_length() {
        let key = [0u8; 16];
        assert!(aes_cipher_msg_auth_code(&key, &[1, 2, 3], 0).is_err());
        assert!(aes_cipher_msg_auth_code(&key, &[1, 2, 3], 17).is_err());
    }

    const U: &str = "20b003d2f297be2c5e2c83a7e9f9a5b9eff49111acf4fddbcc0301480e359de6";
    const V: &str = "55188b3d32f6bb9a900afcfbeed4e72a59cb9ac2f19d7cfb6b4fdd49f47fc5fd";
    const X: &str = "d5cb8454d177733effffb2ec712baeab";
    const Y: &str = "a6e8e7cc25a75f6e216583f7ff3dc4cf";
    const W: &str = "ec0234a357c8ad05341010a60a397d9b99796b13b4f866f1868d34f373bfa698";

    #[test]
    fn test_f4() {
        let c = f4(&le(U), &le(V), &le(X), 0).unwrap();
        assert_eq!(c, le::<16>("f2c916f107a9bd1cf1eda1bea974872d"));
    }

    #[test]
    fn test_g2() {
        assert_eq!(g2(&le(U), &le(V), &le(X), &le(Y)).unwrap(), 938_554);
    }

    #[test]
    fn test_f5() {
        let a1 = [0xce, 0xbf, 0x37, 0x37, 0x12, 0x56, 0x00];
        let a2 = [0xc1, 0xcf, 0x2d, 0x70, 0x13, 0xa7, 0x00];
        let (mac_key, ltk) = f5(&le(W), &le(X), &le(Y), &a1, &a2).unwrap();
        assert_eq!(mac_key, le::<16>("2965f176a1084a02fd3f6a20ce636e20"));
        assert_eq!(ltk, le::<16>("6986791169d7cd23980522b594750a38"));
    }

    #[test]
    fn test_f6() {
        let a1 = [0xce, 0xbf, 0x37, 0x37, 0x12, 0x56, 0x00];
        let a2 = [0xc1, 0xcf, 0x2d, 0x70, 0x13, 0xa7, 0x00];
        let mac_key: [u8; 16] = le("2965f176a1084a02fd3f6a20ce636e20");
        let r: [u8; 16] = le("12a3343bb453bb5408da42d20c2d0fc8");
        let io_cap: [u8; 3] = le("010102");
        let e = f6(&mac_key, &le(X), &le(Y), &r, &io_cap, &a1, &a2).unwrap();
        assert_eq!(e, le::<16>("e3c473989cd0e8c5d26c0b09da958f61"));
    }

    #[test]
    fn test_h6() {
        let w: [u8; 16] = le("ec0234a357c8ad05341010a60a397d9b");
        let key = h6(&w, &H6_KEY_ID_LEBR).unwrap();
        assert_eq!(key, le::<16>("2d9ae102e76dc91ce8d3a9e280b16399"));
    }

    #[test]
    fn test_c1() {
        let k = [0u8; 16];
        let r: [u8; 16] = le("5783d52156ad6f0e6388274ec6702ee0");
        let preq = [0x01, 0x01, 0x00, 0x00, 0x10, 0x07, 0x07];
        let pres = [0x02, 0x03, 0x00, 0x00, 0x08, 0x00, 0x05];
        let ia = [0xa6, 0xa5, 0xa4, 0xa3, 0xa2, 0xa1];
        let ra = [0xb6, 0xb5, 0xb4, 0xb3, 0xb2, 0xb1];
        let confirm = c1(&k, &r, &preq, &pres, 1, &ia, 0, &ra);
        assert_eq!(confirm, le::<16>("1e1e3fef878988ead2a74dc5bef13b86"));
    }

    #[test]
    fn test_s1() {
        let k = [0u8; 16];
        let r1: [u8; 16] = le("000f0e0d0c0b0a091122334455667788");
        let r2: [u8; 16] = le("010203040506070899aabbccddeeff00");
        assert_eq!(s1(&k, &r1, &r2), le::<16>("9a1fe1f0e8b0f49b5b4216ae796da062"));
    }

    #[test]
    fn test_ah_and_rpa_resolution() {
        let irk: [u8; 16] = le("ec0234a357c8ad05341010a60a397d9b");
        let prand: [u8; 3] = le("708194");
        let hash = ah(&irk, &prand);
        assert_eq!(hash, le::<3>("0dfbaa"));

        let rpa = [hash[0], hash[1], hash[2], prand[0], prand[1], prand[2]];
        assert!(resolve_rpa(&irk, &rpa));
        assert!(!resolve_rpa(&[0u8; 16], &rpa));
    }

    #[test]
    fn test_passkey_expansion() {
        let tk = passkey_to_128(123_456);
        assert_eq!(&tk[..4], &[0x40, 0xe2, 0x01, 0x00]);
        assert!(tk[4..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_mask_key() {
        let mut key = [0xffu8; 16];
        mask_key(&mut key, 7);
        assert_eq!(&key[..7], &[0xff; 7]);
        assert!(key[7..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_p256_data_set_2() {
        let ska: [u8; 32] = le("06a516693c9aa31a6084545d0c5db641b48572b97203ddffb7ac73f7d0457663");
        let skb: [u8; 32] = le("529aa0670d72cd6497502ed473502b037e8803b5c60829a5a3caa219505530ba");
        let pka = PublicKey {
            x: le("2c31a47b5779809ef44cb5eaaf5c3e43d5f8faad4a8794cb987e9b03745c78dd"),
            y: le("919512183898dfbecd52e2408e43871fd021109117bd3ed4eaf8437743715d4f"),
        };
        let pkb = PublicKey {
            x: le("f465e43ff23d3f1b9dc7dfc04da8758184dbc966204796eccf0d6cf5e16500cc"),
            y: le("0201d048bcbbd899eeefc424164e33c201c2b010ca6b4d43a8a155cad8ecb279"),
        };
        let expected: [u8; 32] =
            le("ab85843a2f6d883f62e5684b38e307335fe6e1945ecd19604105c6f23221eb69");

        assert_eq!(public_key_from_private(&ska).unwrap(), pka);
        assert_eq!(public_key_from_private(&skb).unwrap(), pkb);
        assert_eq!(compute_dhkey(&ska, &pkb).unwrap(), expected);
        assert_eq!(compute_dhkey(&skb, &pka).unwrap(), expected);
        assert!(compute_dhkey(&skb, &pkb).is_err());
    }

    #[test]
    fn test_debug_key_rejected() {
        let debug_private: [u8; 32] =
            le("3f49f6d4a3c55f3874c9b3e3d2103f504aff607beb40b7995899b8a6cd3c1abd");
        let debug_public = public_key_from_private(&debug_private).unwrap();
        assert!(debug_public.is_debug());

        let (private_key, _) = generate_p256_keypair().unwrap();
        assert!(compute_dhkey(&private_key, &debug_public).is_err());
    }

    #[test]
    fn test_off_curve_point_rejected() {
        let (private_key, _) = generate_p256_keypair().unwrap();
        let bogus = PublicKey {
            x: [1u8; 32],
            y: [2u8; 32],
        };
        assert!(compute_dhkey(&private_key, &bogus).is_err());
    }

    #[test]
    fn test_generated_keypairs_agree() {
        let (a_priv, a_pub) = generate_p256_keypair().unwrap();
        let (b_priv, b_pub) = generate_p256_keypair().unwrap();
        assert_eq!(
            compute_dhkey(&a_priv, &b_pub).unwrap(),
            compute_dhkey(&b_priv, &a_pub).unwrap()
        );
    }
}
