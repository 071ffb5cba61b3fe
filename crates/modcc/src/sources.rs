//! Collection of parsed mod source documents
//!
//! [ModSources] tracks
//! - the source path
//! - the root blocks
//! - the root attributes
//! and defines a numeric index for each. Once added those indices are stable
//! (removal is not possible). File reading and syntax parsing happen here,
//! before decoding starts; the decode loop itself performs no I/O.

use crate::diagnostic::SourceRange;
use hcl_edit::structure::{Attribute, Block, Body, Structure};
use hcl_edit::Span as _;
use std::path::Path;

/// File name of the mod definition document inside a package directory
pub const MOD_FILE_NAME: &str = "mod.hcl";

#[derive(Default, Debug)]
pub struct ModSources {
    sources: Vec<Source>,
    root_attributes: Vec<(usize, Attribute)>,
    root_blocks: Vec<(usize, Block)>,
}

impl ModSources {
    /// Inserts and indexes a parsed document
    pub fn insert(&mut self, document: Body, path: impl Into<Option<std::path::PathBuf>>) {
        let source_index = self.sources.len();
        self.sources.push(path.into());

        for structure in document.into_iter() {
            match structure {
                Structure::Block(block) => self.root_blocks.push((source_index, block)),
                Structure::Attribute(attribute) => {
                    self.root_attributes.push((source_index, attribute))
                }
            }
        }
    }

    pub fn attributes(&self) -> impl Iterator<Item = SourceAttribute> {
        self.root_attributes
            .iter()
            .enumerate()
            .map(|(index, (source_index, attribute))| {
                (index, &self.sources[*source_index], attribute)
            })
    }

    pub fn get_block(&self, index: usize) -> SourceBlock {
        let (source_index, block) = &self.root_blocks[index];
        (index, &self.sources[*source_index], block)
    }

    pub fn blocks(&self) -> impl Iterator<Item = SourceBlock> {
        self.root_blocks
            .iter()
            .enumerate()
            .map(|(index, (source_index, block))| (index, &self.sources[*source_index], block))
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Source range of an indexed root block
    pub fn block_range(&self, index: usize) -> SourceRange {
        let (source_index, block) = &self.root_blocks[index];
        SourceRange::new(self.sources[*source_index].clone(), block.span())
    }
}

impl ModSources {
    pub fn load_file(&mut self, file_path: &Path) -> Result<(), LoadError> {
        let file_path = file_path.canonicalize()?;
        tracing::info!(path=%file_path.display(), "loading file");

        let file_contents = std::fs::read_to_string(&file_path)?;
        let body = hcl_edit::parser::parse_body(&file_contents)?;

        self.insert(body, Some(file_path));
        Ok(())
    }

    /// Load all `*.hcl` documents in a package directory (not recursive)
    pub fn load_directory(&mut self, dir_path: &Path) -> Result<(), LoadError> {
        let mut any_files_loaded = false;

        let read_dir = std::fs::read_dir(dir_path)?;
        for dir_entry in read_dir {
            let dir_entry = dir_entry?;
            if !dir_entry.file_type()?.is_file() {
                continue;
            }

            let is_mod_source = dir_entry.file_name().to_string_lossy().ends_with(".hcl");
            if !is_mod_source {
                continue;
            }

            let file_path = dir_entry.path();
            self.load_file(&file_path)?;
            any_files_loaded = true;
        }

        if !any_files_loaded {
            return Err(LoadError::NoFilesFound);
        }

        Ok(())
    }

    /// Whether the package directory carries a mod definition file
    pub fn mod_file_exists(dir_path: &Path) -> bool {
        dir_path.join(MOD_FILE_NAME).is_file()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("No files found in directory")]
    NoFilesFound,
    #[error("IO error")]
    IoError(#[from] std::io::Error),
    #[error("Unable to parse hcl file")]
    HclParseFailed(#[from] hcl_edit::parser::Error),
}

impl From<Body> for ModSources {
    fn from(value: Body) -> Self {
        let mut sources = ModSources::default();
        sources.insert(value, None);
        sources
    }
}

/// Utility macro to create [ModSources]
///
/// Create from a single document
/// ```
/// # use modcc::mod_sources;
/// mod_sources!("query \"q1\" { sql = \"select 1\" }");
/// ```
///
/// Create from multiple documents (path required)
/// ```
/// # use modcc::mod_sources;
/// mod_sources! {
///   "one.hcl" => "query \"q1\" { sql = \"select 1\" }",
///   "two.hcl" => "query \"q2\" { sql = \"select 2\" }"
/// };
/// ```
///
/// # Panic
/// Panics on invalid input
#[macro_export]
macro_rules! mod_sources {
    // single document without source
    { $expr:expr } => {
        $crate::sources::ModSources::from(hcl_edit::parser::parse_body($expr).expect("body must parse"))
    };
    // multi document with sources
    { $($source:expr => $expr:expr),+ } => {{
        let mut sources = $crate::sources::ModSources::default();
        $(
            sources.insert(hcl_edit::parser::parse_body($expr).expect("body must parse"), Some($source.into()));
        )+

        sources
    }};
}

pub type Source = Option<std::path::PathBuf>;
pub type SourceAttribute<'a> = (usize, &'a Source, &'a Attribute);
pub type SourceBlock<'a> = (usize, &'a Source, &'a Block);

#[cfg(test)]
pub(crate) mod test {
    #[test]
    fn iterators() {
        let sources = mod_sources! {r#"
        attr_1 = 1
        query "one" {}
        benchmark "two" {}
        attr_2 = 2
        "#};

        assert_eq!(sources.attributes().count(), 2);
        assert_eq!(sources.blocks().count(), 2);
    }

    #[test]
    fn block_ranges_point_into_source() {
        let sources = mod_sources! {"query \"q\" { sql = \"select 1\" }"};
        let range = sources.block_range(0);
        assert!(range.span.is_some());
    }
}
