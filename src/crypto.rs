use blake2::digest::consts::U32;
use blake2::{Blake2b, Blake2b512};
use ripemd::Ripemd160;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId, Signature};
use secp256k1::{Message, PublicKey, Secp256k1};
use sha2::{Digest, Sha256};
use sha3::Keccak256;

use crate::error::{Error, Result};

type Blake2b256 = Blake2b<U32>;

// -- Hashes --

pub fn sha256(data: &[u8]) -> [u8; 32] {
	Sha256::digest(data).into()
}

/// `RIPEMD160(SHA256(data))`, the 20-byte account id used by Cosmos and
/// the Avalanche P/X chains.
pub fn hash160(data: &[u8]) -> [u8; 20] {
	Ripemd160::digest(sha256(data)).into()
}

pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
	Blake2b256::digest(data).into()
}

// -- Address formats --

pub fn bech32_encode(hrp: &str, data: &[u8]) -> Result<String> {
	let hrp = bech32::Hrp::parse(hrp).map_err(|e| Error::Codec(format!("invalid hrp {hrp:?}: {e}")))?;
	bech32::encode::<bech32::Bech32>(hrp, data).map_err(|e| Error::Codec(e.to_string()))
}

/// Decode a bech32 string into its human-readable part and payload.
pub fn bech32_decode(s: &str) -> Result<(String, Vec<u8>)> {
	let (hrp, data) =
		bech32::decode(s).map_err(|e| Error::InvalidInput(format!("invalid bech32 {s:?}: {e}")))?;
	Ok((hrp.to_string(), data))
}

/// Ethereum-style address of a secp256k1 key, lowercase and `0x`-prefixed.
pub fn eth_address(public_key: &PublicKey) -> String {
	let uncompressed = public_key.serialize_uncompressed();
	let hash = Keccak256::digest(&uncompressed[1..]);
	format!("0x{}", hex::encode(&hash[12..]))
}

const SS58_PREFIX: &[u8] = b"SS58PRE";

/// SS58 address of a 32-byte account id under the given network prefix.
pub fn ss58_encode(prefix: u16, account: &[u8; 32]) -> String {
	let mut body = match prefix {
		0..=63 => vec![prefix as u8],
		_ => {
			let first = (((prefix & 0b0000_0000_1111_1100) as u8) >> 2) | 0b0100_0000;
			let second = ((prefix >> 8) as u8) | (((prefix & 0b0000_0000_0000_0011) as u8) << 6);
			vec![first, second]
		}
	};
	body.extend_from_slice(account);

	let checksum = ss58_checksum(&body);
	body.extend_from_slice(&checksum[..2]);
	bs58::encode(body).into_string()
}

/// Decode an SS58 address into its prefix and account id.
pub fn ss58_decode(address: &str) -> Result<(u16, [u8; 32])> {
	let invalid = |why: &str| Error::InvalidInput(format!("invalid ss58 address {address:?}: {why}"));

	let raw = bs58::decode(address)
		.into_vec()
		.map_err(|_| invalid("not base58"))?;

	let (prefix, prefix_len) = match raw.first() {
		Some(&b) if b < 64 => (b as u16, 1),
		Some(&b) if b < 128 => {
			let second = *raw.get(1).ok_or_else(|| invalid("truncated"))?;
			let lower = ((b << 2) | (second >> 6)) as u16;
			let upper = (second & 0b0011_1111) as u16;
			(lower | (upper << 8), 2)
		}
		_ => return Err(invalid("unsupported prefix")),
	};

	if raw.len() != prefix_len + 32 + 2 {
		return Err(invalid("unexpected length"));
	}

	let (body, checksum) = raw.split_at(prefix_len + 32);
	if ss58_checksum(body)[..2] != *checksum {
		return Err(invalid("bad checksum"));
	}

	let mut account = [0u8; 32];
	account.copy_from_slice(&body[prefix_len..]);
	Ok((prefix, account))
}

fn ss58_checksum(body: &[u8]) -> [u8; 64] {
	let mut h = Blake2b512::new();
	h.update(SS58_PREFIX);
	h.update(body);
	h.finalize().into()
}

/// Base58 with a 4-byte sha256 checksum, as used for Avalanche ids.
pub fn cb58_encode(data: &[u8]) -> String {
	let mut buf = data.to_vec();
	buf.extend_from_slice(&sha256(data)[28..]);
	bs58::encode(buf).into_string()
}

pub fn cb58_decode(s: &str) -> Result<Vec<u8>> {
	let raw = bs58::decode(s)
		.into_vec()
		.map_err(|_| Error::InvalidInput(format!("invalid cb58 {s:?}")))?;
	if raw.len() < 4 {
		return Err(Error::InvalidInput(format!("cb58 string too short: {s:?}")));
	}
	let (data, checksum) = raw.split_at(raw.len() - 4);
	if sha256(data)[28..] != *checksum {
		return Err(Error::InvalidInput(format!("cb58 checksum mismatch: {s:?}")));
	}
	Ok(data.to_vec())
}

// -- secp256k1 --

pub fn parse_secp256k1(bytes: &[u8]) -> Result<PublicKey> {
	PublicKey::from_slice(bytes)
		.map_err(|e| Error::BackendProtocolViolation(format!("invalid secp256k1 public key: {e}")))
}

fn digest_message(digest: &[u8]) -> Result<Message> {
	let digest: [u8; 32] = digest
		.try_into()
		.map_err(|_| Error::InvalidInput(format!("expected a 32-byte digest, got {} bytes", digest.len())))?;
	Ok(Message::from_digest(digest))
}

fn compact(rs: &[u8]) -> Result<Signature> {
	Signature::from_compact(rs)
		.map_err(|e| Error::BackendProtocolViolation(format!("malformed ecdsa signature: {e}")))
}

/// Bring `r || s` into low-S form. Returns the normalized signature and
/// whether `s` was flipped, which also flips the recovery id parity.
pub fn normalize_s(rs: &[u8; 64]) -> Result<([u8; 64], bool)> {
	let mut sig = compact(rs)?;
	sig.normalize_s();
	let out = sig.serialize_compact();
	Ok((out, out != *rs))
}

pub fn verify_ecdsa(public_key: &PublicKey, digest: &[u8], rs: &[u8; 64]) -> bool {
	let (Ok(msg), Ok(mut sig)) = (digest_message(digest), compact(rs)) else {
		return false;
	};
	sig.normalize_s();
	Secp256k1::verification_only()
		.verify_ecdsa(&msg, &sig, public_key)
		.is_ok()
}

/// Recover the signing key from a recoverable `r || s` and recovery id.
pub fn recover_ecdsa(digest: &[u8], rs: &[u8; 64], v: u8) -> Result<PublicKey> {
	let msg = digest_message(digest)?;
	let id = RecoveryId::from_i32(i32::from(v))
		.map_err(|_| Error::BackendProtocolViolation(format!("invalid recovery id {v}")))?;
	let sig = RecoverableSignature::from_compact(rs, id)
		.map_err(|e| Error::BackendProtocolViolation(format!("malformed signature: {e}")))?;
	Secp256k1::verification_only()
		.recover_ecdsa(&msg, &sig)
		.map_err(|e| Error::BackendProtocolViolation(format!("public key recovery failed: {e}")))
}

/// Find the recovery id that makes `r || s` recover to `expected`.
pub fn find_recovery_id(digest: &[u8], rs: &[u8; 64], expected: &PublicKey) -> Option<u8> {
	(0u8..4).find(|&v| recover_ecdsa(digest, rs, v).is_ok_and(|pk| pk == *expected))
}

// -- ed25519 --

pub fn verify_ed25519(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
	use ed25519_dalek::{Signature, Verifier, VerifyingKey};

	let (Ok(pk), Ok(sig)) = (
		<[u8; 32]>::try_from(public_key),
		<[u8; 64]>::try_from(signature),
	) else {
		return false;
	};
	let Ok(key) = VerifyingKey::from_bytes(&pk) else {
		return false;
	};
	key.verify(message, &Signature::from_bytes(&sig)).is_ok()
}

#[cfg(test)]
mod tests {
	use super::*;
	use secp256k1::SecretKey;

	const ALICE: &str = "d43593c715fdd31c61141abd04a99fd6822c8558854ccde39a5684e7a56da27d";

	fn alice() -> [u8; 32] {
		hex::decode(ALICE).unwrap().try_into().unwrap()
	}

	#[test]
	fn ss58_known_address() {
		assert_eq!(
			ss58_encode(42, &alice()),
			"5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY"
		);
		assert_eq!(
			ss58_encode(0, &alice()),
			"15oF4uVJwmo4TdGW7VfQxNLavjCXviqxT9S1MgbjMNHr6Sp5"
		);
	}

	#[test]
	fn ss58_decode_checks_checksum() {
		let (prefix, account) =
			ss58_decode("5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY").unwrap();
		assert_eq!(prefix, 42);
		assert_eq!(account, alice());

		assert!(ss58_decode("5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQZ").is_err());
		assert!(ss58_decode("not-base58-0OIl").is_err());
	}

	#[test]
	fn ss58_two_byte_prefix() {
		let addr = ss58_encode(2254, &alice());
		let (prefix, account) = ss58_decode(&addr).unwrap();
		assert_eq!(prefix, 2254);
		assert_eq!(account, alice());
	}

	#[test]
	fn cb58_zero_id() {
		assert_eq!(cb58_encode(&[0u8; 32]), "11111111111111111111111111111111LpoYY");
		assert_eq!(
			cb58_decode("11111111111111111111111111111111LpoYY").unwrap(),
			vec![0u8; 32]
		);
		assert!(cb58_decode("11111111111111111111111111111111LpoYZ").is_err());
	}

	#[test]
	fn bech32_matches_hrp_and_payload() {
		let data = [7u8; 20];
		let encoded = bech32_encode("cosmos", &data).unwrap();
		assert!(encoded.starts_with("cosmos1"));
		let (hrp, decoded) = bech32_decode(&encoded).unwrap();
		assert_eq!(hrp, "cosmos");
		assert_eq!(decoded, data);
	}

	#[test]
	fn eth_address_of_secret_one() {
		let secp = Secp256k1::new();
		let mut sk = [0u8; 32];
		sk[31] = 1;
		let pk = PublicKey::from_secret_key(&secp, &SecretKey::from_slice(&sk).unwrap());
		assert_eq!(eth_address(&pk), "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf");
	}

	#[test]
	fn normalize_and_recover() {
		let secp = Secp256k1::new();
		let sk = SecretKey::from_slice(&[0x42; 32]).unwrap();
		let pk = PublicKey::from_secret_key(&secp, &sk);
		let digest = sha256(b"stake");

		let sig = secp.sign_ecdsa(&Message::from_digest(digest), &sk);
		let rs = sig.serialize_compact();
		let (normalized, flipped) = normalize_s(&rs).unwrap();
		assert!(!flipped, "secp256k1 signs in low-S form");
		assert_eq!(normalized, rs);
		assert!(verify_ecdsa(&pk, &digest, &rs));

		let v = find_recovery_id(&digest, &rs, &pk).unwrap();
		assert_eq!(recover_ecdsa(&digest, &rs, v).unwrap(), pk);

		let other = PublicKey::from_secret_key(&secp, &SecretKey::from_slice(&[0x43; 32]).unwrap());
		assert!(!verify_ecdsa(&other, &digest, &rs));
		assert_eq!(find_recovery_id(&digest, &rs, &other), None);
	}

	#[test]
	fn ed25519_rejects_wrong_message() {
		use ed25519_dalek::{Signer, SigningKey};

		let key = SigningKey::from_bytes(&[9u8; 32]);
		let sig = key.sign(b"payload").to_bytes();
		let pk = key.verifying_key().to_bytes();

		assert!(verify_ed25519(&pk, b"payload", &sig));
		assert!(!verify_ed25519(&pk, b"other", &sig));
		assert!(!verify_ed25519(&pk[..31], b"payload", &sig));
	}
}
