use crate::error::{Result, RewriteError};
use crate::oid::{HashAlgo, Oid};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use std::io::{Read, Write};

/// The four object kinds of the git object database.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
  Blob,
  Tree,
  Commit,
  Tag,
}

impl ObjectKind {
  pub fn as_str(self) -> &'static str {
    match self {
      ObjectKind::Blob => "blob",
      ObjectKind::Tree => "tree",
      ObjectKind::Commit => "commit",
      ObjectKind::Tag => "tag",
    }
  }

  pub fn from_str(s: &str) -> Option<Self> {
    match s {
      "blob" => Some(ObjectKind::Blob),
      "tree" => Some(ObjectKind::Tree),
      "commit" => Some(ObjectKind::Commit),
      "tag" => Some(ObjectKind::Tag),
      _ => None,
    }
  }
}

impl std::fmt::Display for ObjectKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Mode of a tree entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileMode {
  Regular,
  Executable,
  Symlink,
  Gitlink,
  Tree,
}

impl FileMode {
  /// Canonical octal form as written into tree bodies.
  pub fn as_bytes(self) -> &'static [u8] {
    match self {
      FileMode::Regular => b"100644",
      FileMode::Executable => b"100755",
      FileMode::Symlink => b"120000",
      FileMode::Gitlink => b"160000",
      FileMode::Tree => b"40000",
    }
  }

  pub fn parse(bytes: &[u8]) -> Option<Self> {
    match bytes {
      b"100644" => Some(FileMode::Regular),
      b"100755" => Some(FileMode::Executable),
      b"120000" => Some(FileMode::Symlink),
      b"160000" => Some(FileMode::Gitlink),
      // Historical writers zero-pad the directory mode.
      b"40000" | b"040000" => Some(FileMode::Tree),
      _ => None,
    }
  }

  pub fn is_file(self) -> bool {
    matches!(self, FileMode::Regular | FileMode::Executable)
  }

  /// Whether two modes can be merged at the blob level.
  pub fn comparable_to(self, other: FileMode) -> bool {
    self == other || (self.is_file() && other.is_file())
  }
}

impl std::fmt::Display for FileMode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(std::str::from_utf8(self.as_bytes()).unwrap())
  }
}

/// A `<name> <email> <unix-ts> <tz>` identity line, kept as raw bytes.
///
/// Field access parses lazily; a malformed signature never prevents the
/// enclosing commit from loading.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
  raw: Vec<u8>,
}

impl Signature {
  pub fn new(raw: Vec<u8>) -> Self {
    Self { raw }
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.raw
  }

  /// `name <email>` with the timestamp stripped, as used for signing keys.
  pub fn signing_key(&self) -> Option<&[u8]> {
    let end = self.raw.iter().rposition(|&b| b == b'>')?;
    Some(self.raw[..=end].trim_ascii())
  }

  pub fn name(&self) -> Option<&[u8]> {
    let lt = self.raw.iter().position(|&b| b == b'<')?;
    Some(self.raw[..lt].trim_ascii())
  }

  pub fn email(&self) -> Option<&[u8]> {
    let lt = self.raw.iter().position(|&b| b == b'<')?;
    let gt = self.raw.iter().rposition(|&b| b == b'>')?;
    (lt < gt).then(|| &self.raw[lt + 1..gt])
  }

  pub fn timestamp(&self) -> Option<i64> {
    let gt = self.raw.iter().rposition(|&b| b == b'>')?;
    let rest = std::str::from_utf8(&self.raw[gt + 1..]).ok()?;
    rest.split_whitespace().next()?.parse().ok()
  }
}

/// A single tree entry: name, mode, and the child object id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeEntry {
  pub mode: FileMode,
  pub name: Vec<u8>,
  pub oid: Oid,
}

impl TreeEntry {
  /// Canonical tree order compares directory names as if they end in `/`.
  pub fn canonical_cmp(a: &TreeEntry, b: &TreeEntry) -> std::cmp::Ordering {
    fn key_byte(entry: &TreeEntry, idx: usize) -> Option<u8> {
      match entry.name.get(idx) {
        Some(&b) => Some(b),
        None if entry.mode == FileMode::Tree && idx == entry.name.len() => Some(b'/'),
        None => None,
      }
    }
    let mut idx = 0;
    loop {
      match (key_byte(a, idx), key_byte(b, idx)) {
        (Some(x), Some(y)) if x == y => idx += 1,
        (x, y) => return x.cmp(&y),
      }
    }
  }
}

/// A directory listing object. Entries are kept in canonical order.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Tree {
  entries: Vec<TreeEntry>,
}

impl Tree {
  /// Build a tree from entries in any order; they are re-sorted canonically.
  pub fn new(mut entries: Vec<TreeEntry>) -> Self {
    entries.sort_by(TreeEntry::canonical_cmp);
    Self { entries }
  }

  pub fn empty() -> Self {
    Self::default()
  }

  pub fn entries(&self) -> &[TreeEntry] {
    &self.entries
  }

  pub fn get(&self, name: &[u8]) -> Option<&TreeEntry> {
    self.entries.iter().find(|e| e.name == name)
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  fn parse(algo: HashAlgo, body: &[u8]) -> Result<Self> {
    let oid_len = algo.oid_len();
    let mut entries = Vec::new();
    let mut rest = body;
    while !rest.is_empty() {
      let sp = rest.iter().position(|&b| b == b' ').ok_or_else(|| corrupt("tree entry missing mode terminator"))?;
      let mode = FileMode::parse(&rest[..sp]).ok_or_else(|| corrupt(&format!("bad tree entry mode {:?}", String::from_utf8_lossy(&rest[..sp]))))?;
      rest = &rest[sp + 1..];

      let nul = rest.iter().position(|&b| b == 0).ok_or_else(|| corrupt("tree entry missing name terminator"))?;
      let name = rest[..nul].to_vec();
      if name.is_empty() || name.contains(&b'/') {
        return Err(corrupt("bad tree entry name"));
      }
      rest = &rest[nul + 1..];

      if rest.len() < oid_len {
        return Err(corrupt("truncated tree entry oid"));
      }
      let oid = Oid::from_bytes(&rest[..oid_len]);
      rest = &rest[oid_len..];

      entries.push(TreeEntry { mode, name, oid });
    }
    // Accept whatever order the body has; serialization re-sorts.
    Ok(Self::new(entries))
  }

  fn serialize(&self, out: &mut Vec<u8>) {
    for entry in &self.entries {
      out.extend_from_slice(entry.mode.as_bytes());
      out.push(b' ');
      out.extend_from_slice(&entry.name);
      out.push(0);
      out.extend_from_slice(entry.oid.as_bytes());
    }
  }
}

/// A commit object with unknown headers preserved verbatim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commit {
  pub tree: Oid,
  pub parents: Vec<Oid>,
  pub author: Signature,
  pub committer: Signature,
  pub gpgsig: Option<Vec<u8>>,
  /// Headers other than the well-known five, in the order they appeared.
  pub extra_headers: Vec<(Vec<u8>, Vec<u8>)>,
  /// Opaque message bytes; any encoding.
  pub message: Vec<u8>,
}

impl Commit {
  pub fn is_root(&self) -> bool {
    self.parents.is_empty()
  }

  /// The summary line of the commit message, as a single lossy string.
  pub fn summary(&self) -> String {
    let first_paragraph = split_once_bytes(&self.message, b"\n\n").map_or(&self.message[..], |(head, _)| head);
    let text = String::from_utf8_lossy(first_paragraph);
    text.lines().collect::<Vec<_>>().join(" ")
  }

  fn parse(algo: HashAlgo, body: &[u8]) -> Result<Self> {
    let (headers, message) = split_once_bytes(body, b"\n\n").ok_or_else(|| corrupt("commit missing header/message separator"))?;

    let mut tree = None;
    let mut parents = Vec::new();
    let mut author = None;
    let mut committer = None;
    let mut gpgsig = None;
    let mut extra_headers = Vec::new();

    for (key, value) in parse_headers(headers)? {
      match key.as_slice() {
        b"tree" => tree = Some(oid_from_header(algo, &value)?),
        b"parent" => parents.push(oid_from_header(algo, &value)?),
        b"author" => author = Some(Signature::new(value)),
        b"committer" => committer = Some(Signature::new(value)),
        b"gpgsig" => gpgsig = Some(value),
        _ => extra_headers.push((key, value)),
      }
    }

    Ok(Commit {
      tree: tree.ok_or_else(|| corrupt("commit missing tree header"))?,
      parents,
      author: author.ok_or_else(|| corrupt("commit missing author header"))?,
      committer: committer.ok_or_else(|| corrupt("commit missing committer header"))?,
      gpgsig,
      extra_headers,
      message: message.to_vec(),
    })
  }

  /// Serialize the header block and message, without any `gpgsig` header.
  ///
  /// This is the pre-image a signature is computed over.
  pub fn serialize_unsigned(&self) -> Vec<u8> {
    let mut out = Vec::new();
    self.write_headers(&mut out);
    out.extend_from_slice(b"\n");
    out.extend_from_slice(&self.message);
    out
  }

  fn write_headers(&self, out: &mut Vec<u8>) {
    write_header(out, b"tree", self.tree.to_hex().as_bytes());
    for parent in &self.parents {
      write_header(out, b"parent", parent.to_hex().as_bytes());
    }
    write_header(out, b"author", self.author.as_bytes());
    write_header(out, b"committer", self.committer.as_bytes());
    for (key, value) in &self.extra_headers {
      write_header(out, key, value);
    }
  }

  fn serialize(&self, out: &mut Vec<u8>) {
    write_header(out, b"tree", self.tree.to_hex().as_bytes());
    for parent in &self.parents {
      write_header(out, b"parent", parent.to_hex().as_bytes());
    }
    write_header(out, b"author", self.author.as_bytes());
    write_header(out, b"committer", self.committer.as_bytes());
    if let Some(sig) = &self.gpgsig {
      write_header(out, b"gpgsig", sig);
    }
    for (key, value) in &self.extra_headers {
      write_header(out, key, value);
    }
    out.extend_from_slice(b"\n");
    out.extend_from_slice(&self.message);
  }
}

/// An annotated tag pointing at another object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
  pub object: Oid,
  pub target_kind: ObjectKind,
  pub name: Vec<u8>,
  pub tagger: Option<Signature>,
  pub extra_headers: Vec<(Vec<u8>, Vec<u8>)>,
  pub message: Vec<u8>,
}

impl Tag {
  fn parse(algo: HashAlgo, body: &[u8]) -> Result<Self> {
    let (headers, message) = split_once_bytes(body, b"\n\n").ok_or_else(|| corrupt("tag missing header/message separator"))?;

    let mut object = None;
    let mut target_kind = None;
    let mut name = None;
    let mut tagger = None;
    let mut extra_headers = Vec::new();

    for (key, value) in parse_headers(headers)? {
      match key.as_slice() {
        b"object" => object = Some(oid_from_header(algo, &value)?),
        b"type" => target_kind = Some(ObjectKind::from_str(&String::from_utf8_lossy(&value)).ok_or_else(|| corrupt("bad tag target type"))?),
        b"tag" => name = Some(value),
        b"tagger" => tagger = Some(Signature::new(value)),
        _ => extra_headers.push((key, value)),
      }
    }

    Ok(Tag {
      object: object.ok_or_else(|| corrupt("tag missing object header"))?,
      target_kind: target_kind.ok_or_else(|| corrupt("tag missing type header"))?,
      name: name.ok_or_else(|| corrupt("tag missing tag header"))?,
      tagger,
      extra_headers,
      message: message.to_vec(),
    })
  }

  fn serialize(&self, out: &mut Vec<u8>) {
    write_header(out, b"object", self.object.to_hex().as_bytes());
    write_header(out, b"type", self.target_kind.as_str().as_bytes());
    write_header(out, b"tag", &self.name);
    if let Some(tagger) = &self.tagger {
      write_header(out, b"tagger", tagger.as_bytes());
    }
    for (key, value) in &self.extra_headers {
      write_header(out, key, value);
    }
    out.extend_from_slice(b"\n");
    out.extend_from_slice(&self.message);
  }
}

/// A fully hydrated object of any kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Object {
  Blob(Vec<u8>),
  Tree(Tree),
  Commit(Commit),
  Tag(Tag),
}

impl Object {
  pub fn kind(&self) -> ObjectKind {
    match self {
      Object::Blob(_) => ObjectKind::Blob,
      Object::Tree(_) => ObjectKind::Tree,
      Object::Commit(_) => ObjectKind::Commit,
      Object::Tag(_) => ObjectKind::Tag,
    }
  }

  /// Parse an object body. The body is the serialized form without the
  /// `<kind> <len>\0` framing header.
  pub fn parse(algo: HashAlgo, kind: ObjectKind, body: &[u8]) -> Result<Self> {
    match kind {
      ObjectKind::Blob => Ok(Object::Blob(body.to_vec())),
      ObjectKind::Tree => Ok(Object::Tree(Tree::parse(algo, body)?)),
      ObjectKind::Commit => Ok(Object::Commit(Commit::parse(algo, body)?)),
      ObjectKind::Tag => Ok(Object::Tag(Tag::parse(algo, body)?)),
    }
  }

  /// Canonical serialized body, suitable for hashing and storage.
  pub fn serialize(&self) -> Vec<u8> {
    let mut out = Vec::new();
    match self {
      Object::Blob(data) => out.extend_from_slice(data),
      Object::Tree(tree) => tree.serialize(&mut out),
      Object::Commit(commit) => commit.serialize(&mut out),
      Object::Tag(tag) => tag.serialize(&mut out),
    }
    out
  }

  pub fn oid(&self, algo: HashAlgo) -> Oid {
    algo.hash_object(self.kind().as_str(), &self.serialize())
  }
}

/// Inflate a loose object file and split off its framing header.
///
/// Pure byte transformation; callers do the file I/O.
pub fn decode_loose(bytes: &[u8]) -> Result<(ObjectKind, Vec<u8>)> {
  let mut inflated = Vec::new();
  ZlibDecoder::new(bytes).read_to_end(&mut inflated).map_err(|e| corrupt(&format!("zlib inflate failed: {e}")))?;

  let nul = inflated.iter().position(|&b| b == 0).ok_or_else(|| corrupt("loose object missing header terminator"))?;
  let header = std::str::from_utf8(&inflated[..nul]).map_err(|_| corrupt("loose object header not ascii"))?;
  let (kind_str, len_str) = header.split_once(' ').ok_or_else(|| corrupt("loose object header missing space"))?;
  let kind = ObjectKind::from_str(kind_str).ok_or_else(|| corrupt(&format!("unknown object kind '{kind_str}'")))?;
  let len: usize = len_str.parse().map_err(|_| corrupt("bad loose object length"))?;

  let body = inflated[nul + 1..].to_vec();
  if body.len() != len {
    return Err(corrupt(&format!("loose object length mismatch: header {len}, body {}", body.len())));
  }
  Ok((kind, body))
}

/// Deflate an object body with its framing header into loose-file bytes.
pub fn encode_loose(kind: ObjectKind, body: &[u8]) -> Vec<u8> {
  let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
  let header = format!("{} {}\0", kind.as_str(), body.len());
  encoder.write_all(header.as_bytes()).expect("write to vec");
  encoder.write_all(body).expect("write to vec");
  encoder.finish().expect("finish to vec")
}

fn corrupt(reason: &str) -> RewriteError {
  RewriteError::CorruptObject { oid: String::new(), reason: reason.to_string() }
}

fn oid_from_header(algo: HashAlgo, value: &[u8]) -> Result<Oid> {
  let hex = std::str::from_utf8(value).map_err(|_| corrupt("oid header not ascii"))?;
  let oid = Oid::from_hex(hex).map_err(|_| corrupt(&format!("bad oid header '{hex}'")))?;
  if oid.as_bytes().len() != algo.oid_len() {
    return Err(corrupt(&format!("oid header '{hex}' has wrong width")));
  }
  Ok(oid)
}

/// Split a header block into `(key, value)` pairs, folding continuation
/// lines (a leading space) into the previous value.
fn parse_headers(headers: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
  let mut result: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
  for line in headers.split(|&b| b == b'\n') {
    if let Some(continuation) = line.strip_prefix(b" ") {
      let (_, value) = result.last_mut().ok_or_else(|| corrupt("continuation line without header"))?;
      value.push(b'\n');
      value.extend_from_slice(continuation);
    } else {
      let sp = line.iter().position(|&b| b == b' ').ok_or_else(|| corrupt("header line missing space"))?;
      result.push((line[..sp].to_vec(), line[sp + 1..].to_vec()));
    }
  }
  Ok(result)
}

/// Write one header, re-encoding embedded newlines as continuation lines.
fn write_header(out: &mut Vec<u8>, key: &[u8], value: &[u8]) {
  out.extend_from_slice(key);
  out.push(b' ');
  let mut first = true;
  for line in value.split(|&b| b == b'\n') {
    if !first {
      out.extend_from_slice(b"\n ");
    }
    out.extend_from_slice(line);
    first = false;
  }
  out.push(b'\n');
}

pub(crate) fn split_once_bytes<'a>(haystack: &'a [u8], needle: &[u8]) -> Option<(&'a [u8], &'a [u8])> {
  let pos = haystack.windows(needle.len()).position(|w| w == needle)?;
  Some((&haystack[..pos], &haystack[pos + needle.len()..]))
}
