//! Opaque pagination cursor codec.
//!
//! A cursor captures the last-returned row's `(key, owner, read)` so a
//! follow-up list can continue strictly after it. The wire form is a
//! self-describing CBOR map (`"k"`, `"u"`, `"r"` keys) encoded as unpadded
//! base64url. Clients must round-trip it verbatim; any structural mismatch
//! on decode is a malformed-cursor rejection, never an empty cursor.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use minicbor::{Decoder, Encoder};
use uuid::Uuid;

use crate::error::{Result, StorageError};

/// Continuation state for one list query session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageCursor {
  pub key: String,
  pub user_id: Uuid,
  pub read: i32,
}

impl StorageCursor {
  /// Serialize to the opaque wire form.
  pub fn encode(&self) -> Result<String> {
    let mut buf = Vec::with_capacity(64);
    let mut enc = Encoder::new(&mut buf);
    enc.map(3)?;
    enc.str("k")?;
    enc.str(&self.key)?;
    enc.str("u")?;
    enc.bytes(self.user_id.as_bytes())?;
    enc.str("r")?;
    enc.i32(self.read)?;
    Ok(URL_SAFE_NO_PAD.encode(buf))
  }

  /// Parse a cursor previously produced by [`encode`](Self::encode).
  ///
  /// Every failure mode collapses to [`StorageError::MalformedCursor`]; the
  /// wire form is opaque and callers get no structural detail back.
  pub fn decode(cursor: &str) -> Result<Self> {
    let raw = URL_SAFE_NO_PAD.decode(cursor).map_err(|_| StorageError::MalformedCursor)?;
    let mut dec = Decoder::new(&raw);

    let len = dec.map().map_err(|_| StorageError::MalformedCursor)?;
    if len != Some(3) {
      return Err(StorageError::MalformedCursor);
    }

    let mut key = None;
    let mut user_id = None;
    let mut read = None;
    for _ in 0..3 {
      match dec.str().map_err(|_| StorageError::MalformedCursor)? {
        "k" => key = Some(dec.str().map_err(|_| StorageError::MalformedCursor)?.to_owned()),
        "u" => {
          let bytes = dec.bytes().map_err(|_| StorageError::MalformedCursor)?;
          user_id = Some(Uuid::from_slice(bytes).map_err(|_| StorageError::MalformedCursor)?);
        }
        "r" => read = Some(dec.i32().map_err(|_| StorageError::MalformedCursor)?),
        _ => return Err(StorageError::MalformedCursor),
      }
    }

    if dec.position() != raw.len() {
      // Trailing bytes mean this was not a cursor we produced.
      return Err(StorageError::MalformedCursor);
    }

    match (key, user_id, read) {
      (Some(key), Some(user_id), Some(read)) => Ok(Self { key, user_id, read }),
      _ => Err(StorageError::MalformedCursor),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_round_trip() {
    let cursor = StorageCursor {
      key: "sword".to_owned(),
      user_id: Uuid::new_v4(),
      read: 2,
    };
    let encoded = cursor.encode().unwrap();
    assert_eq!(StorageCursor::decode(&encoded).unwrap(), cursor);
  }

  #[test]
  fn test_round_trip_zero_owner() {
    let cursor = StorageCursor {
      key: String::new(),
      user_id: Uuid::nil(),
      read: 0,
    };
    let encoded = cursor.encode().unwrap();
    assert_eq!(StorageCursor::decode(&encoded).unwrap(), cursor);
  }

  #[test]
  fn test_encoded_form_is_base64url_unpadded() {
    let cursor = StorageCursor {
      key: "k".repeat(100),
      user_id: Uuid::new_v4(),
      read: 1,
    };
    let encoded = cursor.encode().unwrap();
    assert!(!encoded.contains('='));
    assert!(!encoded.contains('+'));
    assert!(!encoded.contains('/'));
  }

  #[test]
  fn test_decode_rejects_garbage() {
    assert!(matches!(
      StorageCursor::decode("not base64!!"),
      Err(StorageError::MalformedCursor)
    ));
    // Valid base64, invalid CBOR.
    assert!(matches!(
      StorageCursor::decode(&URL_SAFE_NO_PAD.encode(b"hello")),
      Err(StorageError::MalformedCursor)
    ));
  }

  #[test]
  fn test_decode_rejects_trailing_bytes() {
    let cursor = StorageCursor {
      key: "k".to_owned(),
      user_id: Uuid::nil(),
      read: 2,
    };
    let mut raw = URL_SAFE_NO_PAD.decode(cursor.encode().unwrap()).unwrap();
    raw.push(0x00);
    assert!(matches!(
      StorageCursor::decode(&URL_SAFE_NO_PAD.encode(&raw)),
      Err(StorageError::MalformedCursor)
    ));
  }

  #[test]
  fn test_decode_rejects_wrong_uuid_length() {
    let mut buf = Vec::new();
    let mut enc = Encoder::new(&mut buf);
    enc.map(3).unwrap();
    enc.str("k").unwrap();
    enc.str("x").unwrap();
    enc.str("u").unwrap();
    enc.bytes(&[0u8; 4]).unwrap();
    enc.str("r").unwrap();
    enc.i32(2).unwrap();
    assert!(matches!(
      StorageCursor::decode(&URL_SAFE_NO_PAD.encode(&buf)),
      Err(StorageError::MalformedCursor)
    ));
  }
}
