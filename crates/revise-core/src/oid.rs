use crate::error::{Result, RewriteError};
use sha1::Digest;

/// Hash algorithm backing a repository's object ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashAlgo {
  Sha1,
  Sha256,
}

impl HashAlgo {
  pub fn from_object_format(format: &str) -> Result<Self> {
    match format {
      "sha1" => Ok(HashAlgo::Sha1),
      "sha256" => Ok(HashAlgo::Sha256),
      other => Err(RewriteError::Invalid(format!("unknown object format '{other}'"))),
    }
  }

  /// Width of an oid in bytes.
  pub fn oid_len(self) -> usize {
    match self {
      HashAlgo::Sha1 => 20,
      HashAlgo::Sha256 => 32,
    }
  }

  pub fn hash(self, data: &[u8]) -> Oid {
    let mut parts = [data; 1];
    self.hash_parts(&mut parts)
  }

  /// Hash a sequence of byte slices as one stream.
  pub fn hash_parts(self, parts: &[&[u8]]) -> Oid {
    match self {
      HashAlgo::Sha1 => {
        let mut hasher = sha1::Sha1::new();
        for part in parts {
          hasher.update(part);
        }
        Oid::from_bytes(&hasher.finalize())
      }
      HashAlgo::Sha256 => {
        let mut hasher = sha2::Sha256::new();
        for part in parts {
          hasher.update(part);
        }
        Oid::from_bytes(&hasher.finalize())
      }
    }
  }

  /// Hash an object body with its `<kind> <len>\0` framing header.
  pub fn hash_object(self, kind: &str, body: &[u8]) -> Oid {
    let header = format!("{kind} {}\0", body.len());
    self.hash_parts(&[header.as_bytes(), body])
  }
}

/// Git object identifier: the content hash of a serialized object.
///
/// Carries its own width so SHA-1 and SHA-256 repositories share one type.
/// Equality and ordering are byte-wise.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid {
  bytes: [u8; 32],
  len: u8,
}

impl Oid {
  pub fn from_bytes(bytes: &[u8]) -> Self {
    debug_assert!(bytes.len() == 20 || bytes.len() == 32, "oid must be 20 or 32 bytes");
    let mut buf = [0u8; 32];
    buf[..bytes.len()].copy_from_slice(bytes);
    Self { bytes: buf, len: bytes.len() as u8 }
  }

  /// The all-zeros oid git uses to mean "no object".
  pub fn zero(algo: HashAlgo) -> Self {
    Self { bytes: [0u8; 32], len: algo.oid_len() as u8 }
  }

  pub fn from_hex(hex: &str) -> Result<Self> {
    let hex = hex.trim();
    if hex.len() != 40 && hex.len() != 64 {
      return Err(RewriteError::BadRevision(hex.to_string()));
    }
    let mut buf = [0u8; 32];
    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
      let hi = hex_nibble(chunk[0]).ok_or_else(|| RewriteError::BadRevision(hex.to_string()))?;
      let lo = hex_nibble(chunk[1]).ok_or_else(|| RewriteError::BadRevision(hex.to_string()))?;
      buf[i] = (hi << 4) | lo;
    }
    Ok(Self { bytes: buf, len: (hex.len() / 2) as u8 })
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.bytes[..self.len as usize]
  }

  pub fn is_zero(&self) -> bool {
    self.as_bytes().iter().all(|&b| b == 0)
  }

  pub fn to_hex(self) -> String {
    let mut out = String::with_capacity(self.len as usize * 2);
    for b in self.as_bytes() {
      out.push_str(&format!("{b:02x}"));
    }
    out
  }

  /// Shortened hex form used in todo lists and progress output.
  pub fn short(self) -> String {
    let mut hex = self.to_hex();
    hex.truncate(12);
    hex
  }
}

impl std::fmt::Display for Oid {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.to_hex())
  }
}

impl std::fmt::Debug for Oid {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.to_hex())
  }
}

fn hex_nibble(c: u8) -> Option<u8> {
  match c {
    b'0'..=b'9' => Some(c - b'0'),
    b'a'..=b'f' => Some(c - b'a' + 10),
    b'A'..=b'F' => Some(c - b'A' + 10),
    _ => None,
  }
}
