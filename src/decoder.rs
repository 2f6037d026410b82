//! Turns the provider's obfuscated response bodies back into JSON.
//!
//! The cryptographic scheme is provider specific and sits behind
//! [`PayloadCipher`]. [`EnvelopeCipher`] is the scheme the current feed
//! uses: the tail of each body is an encrypted copy of a per-response
//! private key, sealed with the long-lived public key; the rest of the body
//! is sealed with that private key. Both layers are AES-128-CBC with a
//! PBKDF2-HMAC-SHA1 derived key.

use std::future::Future;
use std::sync::Arc;

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::Value;
use sha1::Sha1;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::fetch::Fetch;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

const KEY_SEGMENT_LEN: usize = 88;
const PBKDF2_ROUNDS: u32 = 1000;

/// The injected decode capability: opaque body in, plain JSON out.
pub trait PayloadDecoder: Send + Sync {
    fn decode(&self, body: &str) -> impl Future<Output = Result<Value>> + Send;

    /// Loads whatever the decoder needs before the first body arrives, so it
    /// can run alongside the data fetches.
    fn prepare(&self) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}

/// For feeds that are not encrypted at all.
pub struct PlainDecoder;

impl PayloadDecoder for PlainDecoder {
    async fn decode(&self, body: &str) -> Result<Value> {
        parse_plaintext(body.as_bytes())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub public_key: String,
    pub salt: Vec<u8>,
    pub iv: Vec<u8>,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("public_key", &"<redacted>")
            .field("salt_len", &self.salt.len())
            .field("iv_len", &self.iv.len())
            .finish()
    }
}

#[derive(Deserialize)]
struct RouteListEntry {
    #[serde(rename = "ZoomLevel", default)]
    zoom_level: Option<u64>,
}

#[derive(Deserialize)]
struct KeyList {
    arr: Vec<String>,
    s: Vec<String>,
    v: Vec<String>,
}

impl KeyMaterial {
    /// Picks the key material out of the routes list and the key list.
    ///
    /// The public key sits at the index given by the sum of every route's
    /// `ZoomLevel`; the salt and IV sit at the index given by the length of
    /// the first entry of their own arrays.
    pub fn from_documents(routes_list: &str, key_list: &str) -> Result<Self> {
        let unavailable = |what: &str| Error::KeyUnavailable(what.to_string());

        let routes: Vec<RouteListEntry> = serde_json::from_str(routes_list)
            .map_err(|e| Error::KeyUnavailable(format!("routes list unreadable: {e}")))?;
        let keys: KeyList = serde_json::from_str(key_list)
            .map_err(|e| Error::KeyUnavailable(format!("key list unreadable: {e}")))?;

        let index: u64 = routes.iter().filter_map(|r| r.zoom_level).sum();
        let public_key = usize::try_from(index)
            .ok()
            .and_then(|i| keys.arr.get(i))
            .ok_or_else(|| unavailable("public key index out of range"))?;

        let pick = |list: &[String], name: &str| -> Result<Vec<u8>> {
            let hex_value = list
                .first()
                .and_then(|first| list.get(first.len()))
                .ok_or_else(|| unavailable(&format!("{name} index out of range")))?;
            hex::decode(hex_value.trim())
                .map_err(|e| Error::KeyUnavailable(format!("{name} is not hex: {e}")))
        };

        Ok(Self {
            public_key: public_key.clone(),
            salt: pick(&keys.s, "salt")?,
            iv: pick(&keys.v, "iv")?,
        })
    }
}

/// Where key material is published.
#[derive(Clone, Debug)]
pub struct KeySource {
    pub routes_list_url: String,
    pub key_list_url: String,
}

/// Process-wide cache of key material, fetched lazily and on demand.
pub struct KeyStore {
    source: KeySource,
    cached: RwLock<Option<Arc<KeyMaterial>>>,
}

impl KeyStore {
    pub fn new(source: KeySource) -> Self {
        Self {
            source,
            cached: RwLock::new(None),
        }
    }

    pub fn with_material(source: KeySource, material: KeyMaterial) -> Self {
        Self {
            source,
            cached: RwLock::new(Some(Arc::new(material))),
        }
    }

    pub async fn current<F: Fetch>(&self, fetcher: &F) -> Result<Arc<KeyMaterial>> {
        if let Some(keys) = self.cached.read().await.as_ref() {
            return Ok(keys.clone());
        }

        let mut cached = self.cached.write().await;
        // Another caller may have loaded it while we waited for the lock.
        if let Some(keys) = cached.as_ref() {
            return Ok(keys.clone());
        }
        let keys = Arc::new(self.load(fetcher).await?);
        *cached = Some(keys.clone());
        Ok(keys)
    }

    pub async fn refresh<F: Fetch>(&self, fetcher: &F) -> Result<Arc<KeyMaterial>> {
        let mut cached = self.cached.write().await;
        let keys = Arc::new(self.load(fetcher).await?);
        *cached = Some(keys.clone());
        Ok(keys)
    }

    async fn load<F: Fetch>(&self, fetcher: &F) -> Result<KeyMaterial> {
        let (routes_list, key_list) = tokio::try_join!(
            fetcher.fetch(&self.source.routes_list_url),
            fetcher.fetch(&self.source.key_list_url),
        )?;
        let keys = KeyMaterial::from_documents(&routes_list, &key_list)?;
        info!("loaded key material ({:?})", keys);
        Ok(keys)
    }
}

/// A provider's encryption scheme.
pub trait PayloadCipher: Send + Sync {
    /// Recovers the plaintext. Rejection of the key material itself must be
    /// reported as [`Error::KeyUnavailable`] so the caller can refetch it.
    fn open(&self, body: &str, keys: &KeyMaterial) -> Result<Vec<u8>>;
}

#[derive(Clone, Debug)]
pub struct EnvelopeCipher {
    pub key_segment_len: usize,
    pub rounds: u32,
}

impl Default for EnvelopeCipher {
    fn default() -> Self {
        Self {
            key_segment_len: KEY_SEGMENT_LEN,
            rounds: PBKDF2_ROUNDS,
        }
    }
}

impl EnvelopeCipher {
    fn derive_key(&self, password: &[u8], salt: &[u8]) -> [u8; 16] {
        let mut key = [0u8; 16];
        pbkdf2::pbkdf2_hmac::<Sha1>(password, salt, self.rounds, &mut key);
        key
    }

    fn decrypt_segment(
        &self,
        segment: &str,
        password: &[u8],
        keys: &KeyMaterial,
    ) -> std::result::Result<Vec<u8>, String> {
        let ciphertext = STANDARD
            .decode(segment.trim())
            .map_err(|e| format!("not base64: {e}"))?;
        let key = self.derive_key(password, &keys.salt);
        Aes128CbcDec::new_from_slices(&key, &keys.iv)
            .map_err(|e| format!("bad key or iv length: {e}"))?
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|e| format!("bad padding: {e}"))
    }

    fn encrypt_segment(&self, plaintext: &[u8], password: &[u8], keys: &KeyMaterial) -> Result<String> {
        let key = self.derive_key(password, &keys.salt);
        let ciphertext = Aes128CbcEnc::new_from_slices(&key, &keys.iv)
            .map_err(|e| Error::KeyUnavailable(format!("bad key or iv length: {e}")))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
        Ok(STANDARD.encode(ciphertext))
    }

    /// Inverse of [`PayloadCipher::open`]: seals `plaintext` under
    /// `private_key` and appends the private key envelope.
    pub fn seal(&self, plaintext: &[u8], private_key: &str, keys: &KeyMaterial) -> Result<String> {
        // The envelope must encode to exactly `key_segment_len` characters.
        let block_bytes = (self.key_segment_len / 4 * 3) / 16 * 16;
        let envelope_len = block_bytes.saturating_sub(1);
        let mut envelope = format!("{private_key}|");
        if envelope.len() > envelope_len {
            return Err(Error::Decode("private key too long for the envelope".into()));
        }
        while envelope.len() < envelope_len {
            envelope.push('0');
        }

        let sealed_key = self.encrypt_segment(envelope.as_bytes(), keys.public_key.as_bytes(), keys)?;
        if sealed_key.len() != self.key_segment_len {
            return Err(Error::Decode(format!(
                "envelope encodes to {} characters, expected {}",
                sealed_key.len(),
                self.key_segment_len
            )));
        }
        let body = self.encrypt_segment(plaintext, private_key.as_bytes(), keys)?;
        Ok(body + &sealed_key)
    }
}

impl PayloadCipher for EnvelopeCipher {
    fn open(&self, body: &str, keys: &KeyMaterial) -> Result<Vec<u8>> {
        let body = body.trim();
        if body.len() <= self.key_segment_len || !body.is_ascii() {
            return Err(Error::Decode(format!(
                "body of {} bytes is not an envelope",
                body.len()
            )));
        }
        let (content, sealed_key) = body.split_at(body.len() - self.key_segment_len);

        let envelope = self
            .decrypt_segment(sealed_key, keys.public_key.as_bytes(), keys)
            .map_err(|e| Error::KeyUnavailable(format!("key envelope rejected: {e}")))?;
        let envelope = String::from_utf8(envelope)
            .map_err(|_| Error::KeyUnavailable("key envelope is not text".to_string()))?;
        let private_key = envelope.split('|').next().unwrap_or_default();
        if private_key.is_empty() {
            return Err(Error::KeyUnavailable("key envelope is empty".to_string()));
        }

        self.decrypt_segment(content, private_key.as_bytes(), keys)
            .map_err(Error::Decode)
    }
}

/// Key store plus cipher, with one refetch of key material when the
/// current material is rejected.
pub struct Decoder<F, C = EnvelopeCipher> {
    fetcher: Arc<F>,
    keys: KeyStore,
    cipher: C,
}

impl<F: Fetch, C: PayloadCipher> Decoder<F, C> {
    pub fn new(fetcher: Arc<F>, keys: KeyStore, cipher: C) -> Self {
        Self {
            fetcher,
            keys,
            cipher,
        }
    }
}

impl<F: Fetch, C: PayloadCipher> PayloadDecoder for Decoder<F, C> {
    async fn decode(&self, body: &str) -> Result<Value> {
        let keys = self.keys.current(self.fetcher.as_ref()).await?;
        let plaintext = match self.cipher.open(body, &keys) {
            Err(e) if e.is_retryable() => {
                warn!("key material rejected ({}), refetching once", e);
                let keys = self.keys.refresh(self.fetcher.as_ref()).await?;
                self.cipher.open(body, &keys)?
            }
            other => other?,
        };
        debug!("decrypted {} bytes", plaintext.len());
        parse_plaintext(&plaintext)
    }

    async fn prepare(&self) -> Result<()> {
        self.keys.current(self.fetcher.as_ref()).await.map(|_| ())
    }
}

fn parse_plaintext(plaintext: &[u8]) -> Result<Value> {
    let text = std::str::from_utf8(plaintext)
        .map_err(|e| Error::MalformedPayload(format!("plaintext is not UTF-8: {e}")))?;
    Ok(serde_json::from_str(text)?)
}
