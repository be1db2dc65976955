/// Page snapshot model: the DOM tree and URL handed to the page context.
///
/// A snapshot is a JSON document written by whatever captures the browser
/// tab. A plain-text file is accepted too and becomes a body with a single
/// `div` holding the text.
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Elements that `inner_text` separates with a line break.
const BLOCK_TAGS: &[&str] = &[
    "div", "section", "article", "p", "li", "ul", "ol", "h1", "h2", "h3", "h4", "h5", "h6",
    "header", "footer", "main", "nav", "table", "tr", "br", "body",
];

/// A node of the page tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    Text {
        text: String,
    },
    Element {
        tag: String,
        #[serde(default)]
        children: Vec<Node>,
    },
}

impl Node {
    /// Build an element node.
    pub fn element(tag: &str, children: Vec<Node>) -> Self {
        Node::Element {
            tag: tag.to_ascii_lowercase(),
            children,
        }
    }

    /// Build a text node.
    pub fn text(text: &str) -> Self {
        Node::Text {
            text: text.to_string(),
        }
    }

    /// Lower-cased tag name, `None` for text nodes.
    pub fn tag(&self) -> Option<&str> {
        match self {
            Node::Element { tag, .. } => Some(tag),
            Node::Text { .. } => None,
        }
    }

    /// Every descendant text node concatenated without separators.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        match self {
            Node::Text { text } => out.push_str(text),
            Node::Element { children, .. } => {
                for child in children {
                    child.collect_text(out);
                }
            }
        }
    }

    /// Rendered text, with block elements on their own lines.
    pub fn inner_text(&self) -> String {
        let mut out = String::new();
        self.collect_inner(&mut out);
        out.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn collect_inner(&self, out: &mut String) {
        match self {
            Node::Text { text } => out.push_str(text),
            Node::Element { tag, children } => {
                let block = BLOCK_TAGS.contains(&tag.as_str());
                if block {
                    out.push('\n');
                }
                for child in children {
                    child.collect_inner(out);
                }
                if block {
                    out.push('\n');
                }
            }
        }
    }

    /// All elements (including `self`) in document order.
    pub fn elements(&self) -> Vec<&Node> {
        let mut out = Vec::new();
        self.collect_elements(&mut out);
        out
    }

    fn collect_elements<'a>(&'a self, out: &mut Vec<&'a Node>) {
        if let Node::Element { children, .. } = self {
            out.push(self);
            for child in children {
                child.collect_elements(out);
            }
        }
    }
}

/// The state of a page at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    pub root: Node,
    /// Pre-rendered page text; derived from `root` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl PageSnapshot {
    /// Wrap plain text as a page: `body > div > text`.
    pub fn from_text(url: &str, text: &str) -> Self {
        Self {
            url: url.to_string(),
            root: Node::element("body", vec![Node::element("div", vec![Node::text(text)])]),
            text: None,
        }
    }

    /// The page's rendered text (DOM `innerText` of the body).
    pub fn page_text(&self) -> String {
        match &self.text {
            Some(text) => text.clone(),
            None => self.root.inner_text(),
        }
    }

    /// Load a snapshot from disk.
    ///
    /// Files that do not parse as a JSON snapshot are treated as plain page
    /// text with an empty URL.
    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let contents = std::fs::read_to_string(path).map_err(|e| SnapshotError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        let trimmed = contents.trim_start();
        if trimmed.starts_with('{') {
            return serde_json::from_str(&contents).map_err(|e| SnapshotError::Parse {
                path: path.to_path_buf(),
                source: e,
            });
        }

        Ok(Self::from_text("", &contents))
    }
}

/// Errors from reading a page snapshot.
#[derive(Debug)]
pub enum SnapshotError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl std::fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotError::Io { path, source } => {
                write!(f, "failed to read snapshot {}: {source}", path.display())
            }
            SnapshotError::Parse { path, source } => {
                write!(f, "failed to parse snapshot {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for SnapshotError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SnapshotError::Io { source, .. } => Some(source),
            SnapshotError::Parse { source, .. } => Some(source),
        }
    }
}
