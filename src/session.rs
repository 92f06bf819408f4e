/*!

Transfer sessions with the secret service.

Secrets cross the bus inside a session negotiated once per service
connection. Two algorithms are supported: `plain`, which sends the secret
as-is, and (with the `crypto-rust` feature) the
`dh-ietf1024-sha256-aes128-cbc-pkcs7` algorithm, which agrees on an AES key
through Diffie-Hellman and encrypts each secret with a fresh IV.

*/

use tokio_util::sync::CancellationToken;
use tracing::debug;
#[cfg(feature = "crypto-rust")]
use zeroize::Zeroizing;

use crate::errors::{Result, decode_error};
use crate::proxy::{RemoteObject, reply_arg};
use crate::value::SecretValue;
use crate::variant::{ObjectPath, Variant};

pub const ALGORITHM_PLAIN: &str = "plain";
pub const ALGORITHM_AES: &str = "dh-ietf1024-sha256-aes128-cbc-pkcs7";

enum Algorithm {
    Plain,
    #[cfg(feature = "crypto-rust")]
    Aes { key: Zeroizing<[u8; 16]> },
}

pub struct Session {
    path: ObjectPath,
    algorithm: Algorithm,
}

impl Session {
    /// Open a session on `service`, preferring the encrypted algorithm and
    /// falling back to `plain` only if the peer doesn't support it.
    pub(crate) async fn open(
        service: &RemoteObject,
        prefer_plain: bool,
        cancel: Option<&CancellationToken>,
    ) -> Result<Session> {
        #[cfg(feature = "crypto-rust")]
        if !prefer_plain {
            match Self::open_aes(service, cancel).await {
                Ok(session) => return Ok(session),
                Err(err) if err.is_not_supported() => {
                    debug!("secret service doesn't support encrypted sessions, using plain");
                }
                Err(err) => return Err(err),
            }
        }
        #[cfg(not(feature = "crypto-rust"))]
        let _ = prefer_plain;
        Self::open_plain(service, cancel).await
    }

    async fn open_plain(service: &RemoteObject, cancel: Option<&CancellationToken>) -> Result<Session> {
        let reply = service
            .call(
                "OpenSession",
                vec![Variant::from(ALGORITHM_PLAIN), Variant::from("")],
                cancel,
            )
            .await?;
        let path: ObjectPath = reply_arg(&reply, 1, "OpenSession")?;
        debug!(%path, "opened plain secret session");
        Ok(Session {
            path,
            algorithm: Algorithm::Plain,
        })
    }

    #[cfg(feature = "crypto-rust")]
    async fn open_aes(service: &RemoteObject, cancel: Option<&CancellationToken>) -> Result<Session> {
        let keypair = dh::KeyPair::generate();
        let reply = service
            .call(
                "OpenSession",
                vec![
                    Variant::from(ALGORITHM_AES),
                    Variant::Bytes(keypair.public_bytes()),
                ],
                cancel,
            )
            .await?;
        let peer = reply
            .first()
            .and_then(Variant::as_bytes)
            .ok_or_else(|| crate::errors::protocol_error("OpenSession returned no public key"))?;
        let path: ObjectPath = reply_arg(&reply, 1, "OpenSession")?;
        let key = keypair.derive_key(peer)?;
        debug!(%path, "opened encrypted secret session");
        Ok(Session {
            path,
            algorithm: Algorithm::Aes { key },
        })
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    pub fn algorithms(&self) -> &'static str {
        match self.algorithm {
            Algorithm::Plain => ALGORITHM_PLAIN,
            #[cfg(feature = "crypto-rust")]
            Algorithm::Aes { .. } => ALGORITHM_AES,
        }
    }

    /// Encode `value` as an `(oayays)` secret struct for this session.
    pub(crate) fn encode(&self, value: &SecretValue) -> Result<Variant> {
        let (parameters, payload) = match &self.algorithm {
            Algorithm::Plain => (Vec::new(), value.get().to_vec()),
            #[cfg(feature = "crypto-rust")]
            Algorithm::Aes { key } => dh::encrypt(key, value.get())?,
        };
        Ok(Variant::Struct(vec![
            Variant::Path(self.path.clone()),
            Variant::Bytes(parameters),
            Variant::Bytes(payload),
            Variant::from(value.content_type()),
        ]))
    }

    /// Decode an `(oayays)` secret struct produced for this session.
    pub(crate) fn decode(&self, secret: &Variant) -> Result<SecretValue> {
        let Some(
            [
                Variant::Path(path),
                Variant::Bytes(parameters),
                Variant::Bytes(payload),
                Variant::Str(content_type),
            ],
        ) = secret.as_struct()
        else {
            return Err(decode_error("received an invalid secret structure"));
        };
        if *path != self.path {
            return Err(decode_error(format!(
                "received a secret encoded for session {path}, not {}",
                self.path
            )));
        }
        match &self.algorithm {
            Algorithm::Plain => Ok(SecretValue::new(payload, content_type)),
            #[cfg(feature = "crypto-rust")]
            Algorithm::Aes { key } => {
                let plain = dh::decrypt(key, parameters, payload)?;
                Ok(SecretValue::from_vec(plain, content_type))
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("path", &self.path)
            .field("algorithm", &self.algorithms())
            .finish()
    }
}

/// Diffie-Hellman key agreement over the IETF 1024-bit MODP group, with
/// HKDF-SHA256 key derivation and AES-128-CBC payload encryption.
#[cfg(feature = "crypto-rust")]
pub(crate) mod dh {
    use aes::Aes128;
    use cbc::cipher::block_padding::Pkcs7;
    use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
    use hkdf::Hkdf;
    use num_bigint::BigUint;
    use rand::RngCore;
    use sha2::Sha256;
    use zeroize::Zeroizing;

    use crate::errors::{Result, decode_error};

    // RFC 2409, section 6.2
    const PRIME: [u8; 128] = [
        0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xC9, 0x0F, 0xDA, 0xA2, 0x21, 0x68, 0xC2, 0x34,
        0xC4, 0xC6, 0x62, 0x8B, 0x80, 0xDC, 0x1C, 0xD1, 0x29, 0x02, 0x4E, 0x08, 0x8A, 0x67, 0xCC, 0x74,
        0x02, 0x0B, 0xBE, 0xA6, 0x3B, 0x13, 0x9B, 0x22, 0x51, 0x4A, 0x08, 0x79, 0x8E, 0x34, 0x04, 0xDD,
        0xEF, 0x95, 0x19, 0xB3, 0xCD, 0x3A, 0x43, 0x1B, 0x30, 0x2B, 0x0A, 0x6D, 0xF2, 0x5F, 0x14, 0x37,
        0x4F, 0xE1, 0x35, 0x6D, 0x6D, 0x51, 0xC2, 0x45, 0xE4, 0x85, 0xB5, 0x76, 0x62, 0x5E, 0x7E, 0xC6,
        0xF4, 0x4C, 0x42, 0xE9, 0xA6, 0x37, 0xED, 0x6B, 0x0B, 0xFF, 0x5C, 0xB6, 0xF4, 0x06, 0xB7, 0xED,
        0xEE, 0x38, 0x6B, 0xFB, 0x5A, 0x89, 0x9F, 0xA5, 0xAE, 0x9F, 0x24, 0x11, 0x7C, 0x4B, 0x1F, 0xE6,
        0x49, 0x28, 0x66, 0x51, 0xEC, 0xE6, 0x53, 0x81, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    ];

    const BLOCK: usize = 16;

    type Encryptor = cbc::Encryptor<Aes128>;
    type Decryptor = cbc::Decryptor<Aes128>;

    fn prime() -> BigUint {
        BigUint::from_bytes_be(&PRIME)
    }

    /// The private exponent is kept as wiped-on-drop bytes; the big number
    /// form only lives for the duration of one exponentiation.
    pub(crate) struct KeyPair {
        private: Zeroizing<[u8; 128]>,
        public: BigUint,
    }

    impl KeyPair {
        pub(crate) fn generate() -> Self {
            let mut private = Zeroizing::new([0u8; 128]);
            rand::thread_rng().fill_bytes(&mut private[..]);
            let public = BigUint::from(2u32).modpow(&BigUint::from_bytes_be(&private[..]), &prime());
            Self { private, public }
        }

        pub(crate) fn public_bytes(&self) -> Vec<u8> {
            self.public.to_bytes_be()
        }

        /// Agree on the AES key given the peer's public value.
        pub(crate) fn derive_key(&self, peer: &[u8]) -> Result<Zeroizing<[u8; 16]>> {
            let prime = prime();
            let peer = BigUint::from_bytes_be(peer);
            let one = BigUint::from(1u32);
            if peer <= one || peer >= &prime - &one {
                return Err(decode_error("peer sent an invalid public key"));
            }
            let exponent = BigUint::from_bytes_be(&self.private[..]);
            let shared = Zeroizing::new(peer.modpow(&exponent, &prime).to_bytes_be());
            // the shared secret is left-padded to the size of the group
            let mut ikm = Zeroizing::new([0u8; 128]);
            ikm[128 - shared.len()..].copy_from_slice(&shared);
            let mut key = Zeroizing::new([0u8; 16]);
            Hkdf::<Sha256>::new(None, &ikm[..])
                .expand(&[], &mut key[..])
                .map_err(|_| decode_error("couldn't derive the session key"))?;
            Ok(key)
        }
    }

    /// Encrypt with a fresh random IV; returns `(iv, ciphertext)`.
    pub(crate) fn encrypt(key: &[u8; 16], plain: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut iv = [0u8; BLOCK];
        rand::thread_rng().fill_bytes(&mut iv);
        let encryptor = Encryptor::new_from_slices(key, &iv).map_err(decode_error)?;
        Ok((iv.to_vec(), encryptor.encrypt_padded_vec_mut::<Pkcs7>(plain)))
    }

    pub(crate) fn decrypt(key: &[u8; 16], iv: &[u8], cipher: &[u8]) -> Result<Vec<u8>> {
        if iv.len() != BLOCK {
            return Err(decode_error("secret has an invalid IV length"));
        }
        if cipher.is_empty() || cipher.len() % BLOCK != 0 {
            return Err(decode_error("secret has an invalid ciphertext length"));
        }
        let decryptor = Decryptor::new_from_slices(key, iv).map_err(decode_error)?;
        decryptor
            .decrypt_padded_vec_mut::<Pkcs7>(cipher)
            .map_err(|_| decode_error("secret has invalid padding"))
    }

}
