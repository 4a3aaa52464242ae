use crate::error::{Result, RewriteError};
use crate::object::{self, Commit, Object, ObjectKind, Tree};
use crate::oid::{HashAlgo, Oid};
use crate::pack::PackFile;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, instrument};

struct CachedObject {
  kind: ObjectKind,
  body: Vec<u8>,
  persisted: bool,
}

/// Typed, deduplicating cache over the object database.
///
/// All reads go through the in-memory map; misses hydrate from loose files
/// or pack files. Newly constructed objects live in the same map with the
/// persisted flag unset until `flush` writes them out. Single-threaded by
/// design; the rewrite engine has exclusive access for one invocation.
pub struct Odb {
  algo: HashAlgo,
  objects_dir: PathBuf,
  packs: Vec<PackFile>,
  cache: RefCell<HashMap<Oid, CachedObject>>,
}

impl Odb {
  pub fn open(objects_dir: PathBuf, algo: HashAlgo) -> Result<Self> {
    let mut packs = Vec::new();
    let pack_dir = objects_dir.join("pack");
    if let Ok(entries) = fs::read_dir(&pack_dir) {
      for entry in entries.flatten() {
        let idx_path = entry.path();
        if idx_path.extension().is_some_and(|e| e == "idx") {
          let pack_path = idx_path.with_extension("pack");
          if pack_path.exists() {
            packs.push(PackFile::open(&idx_path, &pack_path, algo)?);
          }
        }
      }
    }
    Ok(Self { algo, objects_dir, packs, cache: RefCell::new(HashMap::new()) })
  }

  pub fn algo(&self) -> HashAlgo {
    self.algo
  }

  /// Hydrated object for an exact oid.
  pub fn get(&self, oid: Oid) -> Result<Object> {
    let (kind, body) = self.get_raw(oid)?;
    Object::parse(self.algo, kind, &body).map_err(|e| with_oid(e, oid))
  }

  /// Raw `(kind, body)` for an exact oid, hydrating the cache on miss.
  pub fn get_raw(&self, oid: Oid) -> Result<(ObjectKind, Vec<u8>)> {
    if let Some(entry) = self.cache.borrow().get(&oid) {
      return Ok((entry.kind, entry.body.clone()));
    }

    let (kind, body) = self.read_from_disk(oid)?;
    let computed = self.algo.hash_object(kind.as_str(), &body);
    if computed != oid {
      return Err(RewriteError::CorruptObject {
        oid: oid.to_hex(),
        reason: format!("content hashes to {computed}"),
      });
    }
    self.cache.borrow_mut().insert(oid, CachedObject { kind, body: body.clone(), persisted: true });
    Ok((kind, body))
  }

  fn read_from_disk(&self, oid: Oid) -> Result<(ObjectKind, Vec<u8>)> {
    let path = self.loose_path(oid);
    if let Ok(bytes) = fs::read(&path) {
      debug!(%oid, "read loose object");
      return object::decode_loose(&bytes).map_err(|e| with_oid(e, oid));
    }

    let resolver = |base: &Oid| self.get_raw(*base);
    for pack in &self.packs {
      if let Some(offset) = pack.lookup(&oid) {
        debug!(%oid, offset, "read packed object");
        return pack.read_object(offset, &resolver).map_err(|e| with_oid(e, oid));
      }
    }

    Err(RewriteError::MissingObject(oid.to_hex()))
  }

  pub fn contains(&self, oid: Oid) -> bool {
    self.cache.borrow().contains_key(&oid) || self.loose_path(oid).exists() || self.packs.iter().any(|p| p.lookup(&oid).is_some())
  }

  pub fn get_commit(&self, oid: Oid) -> Result<Commit> {
    match self.get(oid)? {
      Object::Commit(commit) => Ok(commit),
      other => Err(RewriteError::Invalid(format!("{oid} is a {}, not a commit", other.kind()))),
    }
  }

  pub fn get_tree(&self, oid: Oid) -> Result<Tree> {
    match self.get(oid)? {
      Object::Tree(tree) => Ok(tree),
      other => Err(RewriteError::Invalid(format!("{oid} is a {}, not a tree", other.kind()))),
    }
  }

  pub fn get_blob(&self, oid: Oid) -> Result<Vec<u8>> {
    match self.get(oid)? {
      Object::Blob(data) => Ok(data),
      other => Err(RewriteError::Invalid(format!("{oid} is a {}, not a blob", other.kind()))),
    }
  }

  /// Insert a new object, deduplicating against anything already known.
  pub fn new_object(&self, kind: ObjectKind, body: Vec<u8>) -> Oid {
    let oid = self.algo.hash_object(kind.as_str(), &body);
    self.cache.borrow_mut().entry(oid).or_insert(CachedObject { kind, body, persisted: false });
    oid
  }

  pub fn new_blob(&self, data: Vec<u8>) -> Oid {
    self.new_object(ObjectKind::Blob, data)
  }

  pub fn new_tree(&self, tree: &Tree) -> Oid {
    self.new_object(ObjectKind::Tree, Object::Tree(tree.clone()).serialize())
  }

  pub fn new_commit(&self, commit: &Commit) -> Oid {
    self.new_object(ObjectKind::Commit, Object::Commit(commit.clone()).serialize())
  }

  /// Resolve an abbreviated hex prefix to a unique oid.
  ///
  /// Searches the in-memory cache, the loose directories, and every pack
  /// index; the match must be unique across all of them.
  pub fn resolve_abbrev(&self, prefix: &str) -> Result<Oid> {
    if prefix.len() < 4 || prefix.len() > self.algo.oid_len() * 2 || !prefix.bytes().all(|b| b.is_ascii_hexdigit()) {
      return Err(RewriteError::BadRevision(prefix.to_string()));
    }
    let prefix = prefix.to_ascii_lowercase();

    let mut matches: Vec<Oid> = Vec::new();
    let mut push = |oid: Oid| {
      if !matches.contains(&oid) {
        matches.push(oid);
      }
    };

    for oid in self.cache.borrow().keys() {
      if oid.to_hex().starts_with(&prefix) {
        push(*oid);
      }
    }

    let fan_dir = self.objects_dir.join(&prefix[..2]);
    if let Ok(entries) = fs::read_dir(&fan_dir) {
      for entry in entries.flatten() {
        let name = entry.file_name();
        let rest = name.to_string_lossy().to_string();
        if rest.starts_with(&prefix[2..])
          && let Ok(oid) = Oid::from_hex(&format!("{}{rest}", &prefix[..2]))
        {
          push(oid);
        }
      }
    }

    let mut packed = Vec::new();
    for pack in &self.packs {
      pack.prefix_matches(&prefix, &mut packed);
    }
    for oid in packed {
      push(oid);
    }

    match matches.len() {
      0 => Err(RewriteError::MissingObject(prefix)),
      1 => Ok(matches[0]),
      _ => Err(RewriteError::AmbiguousOid(prefix)),
    }
  }

  fn loose_path(&self, oid: Oid) -> PathBuf {
    let hex = oid.to_hex();
    self.objects_dir.join(&hex[..2]).join(&hex[2..])
  }

  /// Persist every unpersisted object reachable from `root`, post-order.
  ///
  /// Referents are always written before their referrers, each as a loose
  /// file via tempfile + rename. Idempotent: already persisted objects are
  /// skipped, as are reachable oids that only exist on disk.
  #[instrument(skip(self), fields(root = %root))]
  pub fn flush(&self, root: Oid) -> Result<()> {
    let mut stack = vec![(root, false)];
    while let Some((oid, children_done)) = stack.pop() {
      let children = {
        let cache = self.cache.borrow();
        let Some(entry) = cache.get(&oid) else {
          continue; // on-disk object, nothing to do
        };
        if entry.persisted {
          continue;
        }
        if children_done {
          None
        } else {
          Some(self.referenced_oids(entry.kind, &entry.body)?)
        }
      };

      match children {
        Some(children) => {
          stack.push((oid, true));
          for child in children {
            stack.push((child, false));
          }
        }
        None => {
          let mut cache = self.cache.borrow_mut();
          let entry = cache.get_mut(&oid).expect("entry checked above");
          self.write_loose(oid, entry.kind, &entry.body)?;
          entry.persisted = true;
          debug!(%oid, kind = %entry.kind, "persisted object");
        }
      }
    }
    Ok(())
  }

  fn referenced_oids(&self, kind: ObjectKind, body: &[u8]) -> Result<Vec<Oid>> {
    match Object::parse(self.algo, kind, body)? {
      Object::Blob(_) => Ok(Vec::new()),
      Object::Tree(tree) => Ok(
        tree
          .entries()
          .iter()
          .filter(|e| e.mode != crate::object::FileMode::Gitlink)
          .map(|e| e.oid)
          .collect(),
      ),
      Object::Commit(commit) => {
        let mut oids = vec![commit.tree];
        oids.extend(commit.parents);
        Ok(oids)
      }
      Object::Tag(tag) => Ok(vec![tag.object]),
    }
  }

  fn write_loose(&self, oid: Oid, kind: ObjectKind, body: &[u8]) -> Result<()> {
    let path = self.loose_path(oid);
    if path.exists() {
      return Ok(());
    }
    fs::create_dir_all(path.parent().expect("loose path has fan-out dir"))?;

    let compressed = object::encode_loose(kind, body);
    let tmp = tempfile::NamedTempFile::new_in(&self.objects_dir)?;
    fs::write(tmp.path(), &compressed)?;
    match tmp.persist(&path) {
      Ok(_) => Ok(()),
      // A racing writer produced the same content-addressed file.
      Err(_) if path.exists() => Ok(()),
      Err(e) => Err(e.error.into()),
    }
  }
}

fn with_oid(err: RewriteError, oid: Oid) -> RewriteError {
  match err {
    RewriteError::CorruptObject { reason, .. } => RewriteError::CorruptObject { oid: oid.to_hex(), reason },
    other => other,
  }
}
