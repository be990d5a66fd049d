//! Document selection
//!
//! Decides which documents are routed to clangd: C-family files on the
//! Sudu scheme, detected by extension.

use std::collections::HashMap;
use std::path::Path;

use crate::dvfs::DVFS_SCHEME;
use crate::uri_codec::ClientUri;

/// One language clangd is registered for
#[derive(Debug, Clone)]
pub struct DocumentFilter {
    /// Language ID for textDocument/didOpen
    pub language_id: String,
    /// File extensions mapped to this language
    pub extensions: Vec<String>,
}

impl DocumentFilter {
    fn new(language_id: &str, extensions: &[&str]) -> Self {
        Self {
            language_id: language_id.to_string(),
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
        }
    }

    pub fn c() -> Self {
        Self::new("c", &["c"])
    }

    pub fn cpp() -> Self {
        Self::new(
            "cpp",
            &["cpp", "cc", "cxx", "c++", "h", "hh", "hpp", "hxx", "h++", "inl", "ipp", "tpp"],
        )
    }

    pub fn cuda_cpp() -> Self {
        Self::new("cuda-cpp", &["cu", "cuh"])
    }

    pub fn objective_c() -> Self {
        Self::new("objective-c", &["m"])
    }

    pub fn objective_cpp() -> Self {
        Self::new("objective-cpp", &["mm"])
    }
}

/// Scheme plus extension based selector
///
/// `.h` is mapped to `cpp`; clangd decides the real dialect from compile
/// commands.
#[derive(Debug, Clone)]
pub struct DocumentSelector {
    scheme: String,
    /// Extension to language mapping
    extension_map: HashMap<String, String>,
}

impl Default for DocumentSelector {
    fn default() -> Self {
        Self::clangd()
    }
}

impl DocumentSelector {
    pub fn new(scheme: &str) -> Self {
        Self {
            scheme: scheme.to_string(),
            extension_map: HashMap::new(),
        }
    }

    /// The selector clangd is registered with
    pub fn clangd() -> Self {
        let mut selector = Self::new(DVFS_SCHEME);
        selector.register(DocumentFilter::c());
        selector.register(DocumentFilter::cpp());
        selector.register(DocumentFilter::cuda_cpp());
        selector.register(DocumentFilter::objective_c());
        selector.register(DocumentFilter::objective_cpp());
        selector
    }

    pub fn register(&mut self, filter: DocumentFilter) {
        for ext in &filter.extensions {
            self.extension_map
                .insert(ext.to_ascii_lowercase(), filter.language_id.clone());
        }
    }

    /// Get the language for a file path
    pub fn language_for_path(&self, path: &str) -> Option<&str> {
        let ext = Path::new(path).extension().and_then(|e| e.to_str())?;
        self.extension_map
            .get(&ext.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Language of a document, `None` when clangd must not see it
    pub fn language_for(&self, uri: &ClientUri) -> Option<&str> {
        if uri.scheme != self.scheme {
            return None;
        }
        self.language_for_path(&uri.path)
    }

    pub fn matches(&self, uri: &ClientUri) -> bool {
        self.language_for(uri).is_some()
    }
}
