//! Loading of documents and images referenced by URI.

use url::Url;

use crate::document::{Document, NodeId};
use crate::error::SvgError;
use crate::parse::ParseOptions;
use crate::registry::{normalize_reference, split_external_reference};

/// Fetches the bytes behind an absolute URI.
///
/// Implementations must be `Send + Sync` so one loader can serve documents
/// rendered on several threads.
pub trait ReferenceLoader: Send + Sync {
    fn fetch(&self, url: &Url) -> Result<Vec<u8>, SvgError>;

    /// Fetches and parses an SVG document, using `url` as its base URI.
    fn load_document(&self, url: &Url) -> Result<Document, SvgError> {
        let bytes = self.fetch(url)?;
        let text = String::from_utf8(bytes)
            .map_err(|e| SvgError::Load(format!("{url} is not UTF-8: {e}")))?;
        Document::parse_with(
            &text,
            &ParseOptions {
                base_uri: Some(url.clone()),
                ..ParseOptions::default()
            },
        )
    }
}

/// Reads `file:` URIs from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLoader;

impl ReferenceLoader for FileLoader {
    fn fetch(&self, url: &Url) -> Result<Vec<u8>, SvgError> {
        if url.scheme() != "file" {
            return Err(SvgError::UnsupportedReferenceScheme(url.scheme().to_string()));
        }
        let path = url
            .to_file_path()
            .map_err(|_| SvgError::Load(format!("{url} is not a local path")))?;
        Ok(std::fs::read(path)?)
    }
}

#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpLoader {
    timeout: std::time::Duration,
    max_size: u64,
}

#[cfg(feature = "http")]
impl Default for HttpLoader {
    fn default() -> Self {
        Self {
            timeout: std::time::Duration::from_secs(30),
            max_size: 50 * 1024 * 1024,
        }
    }
}

#[cfg(feature = "http")]
impl HttpLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }
}

#[cfg(feature = "http")]
impl ReferenceLoader for HttpLoader {
    fn fetch(&self, url: &Url) -> Result<Vec<u8>, SvgError> {
        use std::io::Read;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(SvgError::UnsupportedReferenceScheme(url.scheme().to_string()));
        }
        let agent = ureq::AgentBuilder::new().timeout(self.timeout).build();
        let response = agent
            .get(url.as_str())
            .call()
            .map_err(|e| SvgError::Load(format!("{url}: {e}")))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(self.max_size)
            .read_to_end(&mut bytes)?;
        if bytes.is_empty() {
            return Err(SvgError::Load(format!("{url}: empty response body")));
        }
        Ok(bytes)
    }
}

/// Dispatches on the URI scheme: `file`, plus `http`/`https` when the `http`
/// feature is enabled.
#[derive(Debug, Clone, Default)]
pub struct DefaultLoader {
    file: FileLoader,
    #[cfg(feature = "http")]
    http: HttpLoader,
}

impl ReferenceLoader for DefaultLoader {
    fn fetch(&self, url: &Url) -> Result<Vec<u8>, SvgError> {
        match url.scheme() {
            "file" => self.file.fetch(url),
            #[cfg(feature = "http")]
            "http" | "https" => self.http.fetch(url),
            #[cfg(not(feature = "http"))]
            "http" | "https" => Err(SvgError::Load(format!(
                "{url}: http loading requires the `http` feature"
            ))),
            other => Err(SvgError::UnsupportedReferenceScheme(other.to_string())),
        }
    }
}

/// Resolves `reference` against `base`. Without a base, relative references
/// are taken as paths relative to the working directory.
pub fn resolve_url(base: Option<&Url>, reference: &str) -> Result<Url, SvgError> {
    let reference = reference.trim();
    match Url::parse(reference) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => match base {
            Some(base) => base
                .join(reference)
                .map_err(|e| SvgError::Load(format!("cannot resolve '{reference}': {e}"))),
            None => {
                let path = std::env::current_dir()?.join(reference);
                Url::from_file_path(&path)
                    .map_err(|_| SvgError::Load(format!("cannot resolve '{reference}'")))
            }
        },
        Err(e) => Err(SvgError::Load(format!("invalid reference '{reference}': {e}"))),
    }
}

/// Bytes behind `url` using the [`DefaultLoader`].
pub fn fetch_bytes(url: &Url) -> Result<Vec<u8>, SvgError> {
    DefaultLoader::default().fetch(url)
}

/// Target of a resolved reference.
#[derive(Debug, Clone)]
pub enum ResolvedReference {
    Local(NodeId),
    /// Element inside a separately loaded document.
    External { document: Box<Document>, node: NodeId },
}

const SUPPORTED_SCHEMES: &[&str] = &["file", "http", "https"];

impl Document {
    /// Resolves a local id reference, or loads the document named by an
    /// absolute or base-relative URI and resolves the fragment inside it.
    /// A URI without a fragment resolves to the loaded document's root.
    pub fn resolve_reference(
        &self,
        reference: &str,
        loader: &dyn ReferenceLoader,
    ) -> Result<ResolvedReference, SvgError> {
        if let Some(node) = self.get_element_by_id(reference) {
            return Ok(ResolvedReference::Local(node));
        }
        let (uri, fragment) = match split_external_reference(reference) {
            Some((uri, fragment)) => (uri, Some(fragment)),
            None => {
                let bare = normalize_reference(reference);
                if reference.trim().starts_with('#') || !bare.contains(':') {
                    return Err(SvgError::MissingReferencedElement(bare.to_string()));
                }
                (bare, None)
            }
        };

        let url = resolve_url(self.base_uri(), uri)?;
        if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
            return Err(SvgError::UnsupportedReferenceScheme(url.scheme().to_string()));
        }
        let document = loader.load_document(&url)?;
        let node = match fragment {
            Some(fragment) => document
                .get_element_by_id(fragment)
                .ok_or_else(|| SvgError::MissingReferencedElement(format!("{url}#{fragment}")))?,
            None => document.root(),
        };
        Ok(ResolvedReference::External {
            document: Box::new(document),
            node,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Serves fixed documents keyed by URI.
    struct MapLoader(HashMap<String, String>);

    impl ReferenceLoader for MapLoader {
        fn fetch(&self, url: &Url) -> Result<Vec<u8>, SvgError> {
            self.0
                .get(url.as_str())
                .map(|s| s.as_bytes().to_vec())
                .ok_or_else(|| SvgError::Load(format!("{url} not found")))
        }
    }

    fn loader() -> MapLoader {
        let mut files = HashMap::new();
        files.insert(
            "file:///art/shapes.svg".to_string(),
            r#"<svg xmlns="http://www.w3.org/2000/svg"><circle id="dot" r="2"/></svg>"#.to_string(),
        );
        MapLoader(files)
    }

    #[test]
    fn relative_references_resolve_against_base() {
        let base = Url::parse("file:///art/index.svg").expect("base");
        let url = resolve_url(Some(&base), "shapes.svg").expect("resolve");
        assert_eq!(url.as_str(), "file:///art/shapes.svg");
        let absolute = resolve_url(Some(&base), "https://example.com/a.svg").expect("absolute");
        assert_eq!(absolute.scheme(), "https");
    }

    #[test]
    fn external_fragments_load_through_the_loader() {
        let mut doc = Document::new();
        doc.set_base_uri(Some(Url::parse("file:///art/index.svg").expect("base")));
        let resolved = doc
            .resolve_reference("url(shapes.svg#dot)", &loader())
            .expect("external reference");
        let ResolvedReference::External { document, node } = resolved else {
            panic!("external reference expected");
        };
        assert_eq!(document.tag(node), Some("circle"));
        assert_eq!(document.base_uri().map(Url::as_str), Some("file:///art/shapes.svg"));

        let missing = doc.resolve_reference("shapes.svg#nothing", &loader());
        assert!(matches!(missing, Err(SvgError::MissingReferencedElement(_))));
    }

    #[test]
    fn local_references_and_unsupported_schemes() {
        let mut doc = Document::new();
        let root = doc.root();
        let rect = doc.create_element("rect");
        doc.set_attribute(rect, "id", "box").expect("id");
        doc.append_child(root, rect).expect("append");

        assert!(matches!(
            doc.resolve_reference("#box", &loader()),
            Ok(ResolvedReference::Local(n)) if n == rect
        ));
        assert!(matches!(
            doc.resolve_reference("#gone", &loader()),
            Err(SvgError::MissingReferencedElement(_))
        ));
        assert!(matches!(
            doc.resolve_reference("ftp://host/a.svg#x", &loader()),
            Err(SvgError::UnsupportedReferenceScheme(scheme)) if scheme == "ftp"
        ));
    }

    #[test]
    fn file_loader_reads_local_files() {
        let dir = std::env::temp_dir().join(format!("svgdraw-loader-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("temp dir");
        let path = dir.join("plain.svg");
        std::fs::write(&path, "<svg xmlns=\"http://www.w3.org/2000/svg\"/>").expect("write");
        let url = Url::from_file_path(&path).expect("file url");
        let bytes = FileLoader.fetch(&url).expect("read");
        assert!(bytes.starts_with(b"<svg"));
        let doc = FileLoader.load_document(&url).expect("parse");
        assert_eq!(doc.tag(doc.root()), Some("svg"));
        assert!(matches!(
            FileLoader.fetch(&Url::parse("https://example.com/").expect("url")),
            Err(SvgError::UnsupportedReferenceScheme(_))
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
