//! Path Classifier: decides what a path *is* against the flat,
//! directory-entry-free list of file records.
//!
//! There are no directory records except the synthetic empty-dir
//! sentinel (a zero-length file whose path ends in `/`): directory
//! existence is entirely implied by prefix relationships between stored
//! paths.

use crate::directory::Directory;
use crate::record::FileHeader;
use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    ExistsAsFile,
    ExistsAsEmptyDir,
    ExistsAsNonemptyDir,
    InvalidBecauseNotDirs,
    InvalidBecauseNotFound,
    Creatable,
}

/// The record that determined a [`Classification`], when one exists.
#[derive(Debug, Clone)]
pub struct Witness {
    pub addr: u32,
    pub header: FileHeader,
}

#[derive(Debug, Clone)]
pub struct ClassifyResult {
    pub class: Classification,
    pub witness: Option<Witness>,
    /// Number of stored records whose path begins with `path`'s parent
    /// directory prefix; used by unlink/rmdir to decide whether a
    /// synthetic empty-dir sentinel must be created to keep an
    /// otherwise-orphaned parent visible.
    pub parent_siblings: usize,
}

fn parent_dir(path: &str) -> &str {
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    match trimmed.rfind('/') {
        Some(0) => "/",
        Some(i) => &trimmed[..=i],
        None => "/",
    }
}

/// Per-path accumulator driven one record at a time, so that classifying
/// several paths costs a single shared list walk rather than one walk
/// per path.
struct Accum<'a> {
    path_trimmed: &'a str,
    prefix_with_slash: heapless::String<{ crate::config::PATH_MAX }>,
    parent: &'a str,
    parent_exists: bool,
    parent_siblings: usize,
    exact: Option<Witness>,
    exact_is_dir: bool,
    has_nonempty_children: bool,
    not_dirs: bool,
}

impl<'a> Accum<'a> {
    fn new(path: &'a str) -> Self {
        // Directory markers are stored with a trailing '/' (invariant 6);
        // queries are usually passed without one (`stat("/d")`). Compare
        // on the trailing-slash-stripped form so a query matches its
        // marker regardless of which form the caller used, and rely on
        // `h.is_dir()` (derived from the *stored* path) for the
        // directory/file distinction.
        let path_trimmed = path.strip_suffix('/').unwrap_or(path);
        let prefix_with_slash = {
            let mut s = heapless::String::new();
            let _ = s.push_str(path_trimmed);
            let _ = s.push('/');
            s
        };
        let parent = parent_dir(path);
        Self {
            path_trimmed,
            prefix_with_slash,
            parent,
            parent_exists: parent == "/",
            parent_siblings: 0,
            exact: None,
            exact_is_dir: false,
            has_nonempty_children: false,
            not_dirs: false,
        }
    }

    /// Folds one stored record into this path's running classification
    /// state.
    fn visit(&mut self, addr: u32, h: &FileHeader) {
        let p = h.path.as_str();
        let p_trimmed = p.strip_suffix('/').unwrap_or(p);

        if p_trimmed == self.path_trimmed {
            self.exact = Some(Witness { addr, header: h.clone() });
            self.exact_is_dir = h.is_dir();
        } else if p.starts_with(self.prefix_with_slash.as_str()) {
            self.has_nonempty_children = true;
        }

        // A stored file (not a dir marker) that is a strict, non-slash
        // prefix-terminated ancestor of `path` means some path component
        // we expected to be a directory is actually a file.
        if !h.is_dir() && self.path_trimmed.len() > p.len() && self.path_trimmed.starts_with(p) {
            let next_char = self.path_trimmed.as_bytes()[p.len()];
            if next_char == b'/' {
                self.not_dirs = true;
            }
        }

        // The parent exists either as an explicit record (file or dir
        // marker, compared trailing-slash-insensitively) or implicitly,
        // per invariant 7, via any descendant living under it.
        if p_trimmed == self.parent.strip_suffix('/').unwrap_or(self.parent) || p.starts_with(self.parent) {
            self.parent_exists = true;
        }
        if p_trimmed != self.path_trimmed && p.starts_with(self.parent) {
            self.parent_siblings += 1;
        }
    }

    fn finish(self) -> ClassifyResult {
        let class = if self.not_dirs {
            Classification::InvalidBecauseNotDirs
        } else if let Some(w) = &self.exact {
            if self.exact_is_dir {
                if self.has_nonempty_children {
                    Classification::ExistsAsNonemptyDir
                } else {
                    Classification::ExistsAsEmptyDir
                }
            } else if self.has_nonempty_children {
                // A file cannot also have children; treat as a layout
                // contradiction surfaced the same way as a not-dirs case.
                Classification::InvalidBecauseNotDirs
            } else {
                let _ = w;
                Classification::ExistsAsFile
            }
        } else if self.has_nonempty_children {
            // No record stores `path` itself (with or without trailing
            // `/`), but at least one stored path begins with `path/`: the
            // directory exists implicitly per invariant 7 even without an
            // explicit empty-dir sentinel.
            Classification::ExistsAsNonemptyDir
        } else if !self.parent_exists {
            Classification::InvalidBecauseNotFound
        } else {
            Classification::Creatable
        };

        ClassifyResult {
            class,
            witness: self.exact,
            parent_siblings: self.parent_siblings,
        }
    }
}

/// Classifies `path` against every stored record. `O(#files x
/// min(|path|, PATH_MAX))`.
pub fn classify<NV, const PAGE_SIZE: usize>(
    dir: &mut Directory<NV, PAGE_SIZE>,
    path: &str,
) -> Result<ClassifyResult, crate::error::DirectoryError>
where
    NV: ReadNorFlash + NorFlash,
{
    let mut acc = Accum::new(path);
    let mut cur = dir.head()?;
    while let Some((addr, h)) = cur {
        acc.visit(addr, &h);
        cur = dir.next(addr, &h)?;
    }
    Ok(acc.finish())
}

/// Classifies two paths in one pass (rename's `from`/`to` arguments),
/// walking the list exactly once and folding each record into both
/// accumulators.
pub fn classify_pair<NV, const PAGE_SIZE: usize>(
    dir: &mut Directory<NV, PAGE_SIZE>,
    from: &str,
    to: &str,
) -> Result<(ClassifyResult, ClassifyResult), crate::error::DirectoryError>
where
    NV: ReadNorFlash + NorFlash,
{
    let mut a = Accum::new(from);
    let mut b = Accum::new(to);
    let mut cur = dir.head()?;
    while let Some((addr, h)) = cur {
        a.visit(addr, &h);
        b.visit(addr, &h);
        cur = dir.next(addr, &h)?;
    }
    Ok((a.finish(), b.finish()))
}
