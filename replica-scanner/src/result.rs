use serde::{Deserialize, Serialize};
use std::fmt;

/// Asset category. Determines the output subdirectory and the extension
/// used when a reference carries none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Stylesheet,
    Script,
    Image,
    Font,
    Other,
}

impl Bucket {
    /// Buckets in the order they are resolved.
    pub const ALL: [Bucket; 5] = [
        Bucket::Stylesheet,
        Bucket::Script,
        Bucket::Image,
        Bucket::Font,
        Bucket::Other,
    ];

    pub fn dir_name(&self) -> &'static str {
        match self {
            Bucket::Stylesheet => "css",
            Bucket::Script => "js",
            Bucket::Image => "images",
            Bucket::Font => "fonts",
            Bucket::Other => "assets",
        }
    }

    pub fn default_extension(&self) -> &'static str {
        match self {
            Bucket::Stylesheet => ".css",
            Bucket::Script => ".js",
            Bucket::Image => ".png",
            Bucket::Font => ".woff2",
            Bucket::Other => ".bin",
        }
    }

    /// Classify a `url()` reference found inside a stylesheet.
    /// Only fonts and images are recognised; everything else lands in `Other`.
    pub fn classify_stylesheet_reference(reference: &str) -> Bucket {
        let path = reference
            .split(['?', '#'])
            .next()
            .unwrap_or(reference)
            .to_ascii_lowercase();
        let ext = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
        match ext {
            "woff" | "woff2" | "ttf" | "otf" | "eot" => Bucket::Font,
            "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" | "ico" | "avif" => Bucket::Image,
            _ => Bucket::Other,
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Bucket::Stylesheet => "stylesheet",
            Bucket::Script => "script",
            Bucket::Image => "image",
            Bucket::Font => "font",
            Bucket::Other => "other",
        };
        f.write_str(name)
    }
}

/// Resources referenced by one captured page, partitioned into disjoint buckets.
/// A reference is kept in the first bucket it was inserted into.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInventory {
    stylesheet: Vec<String>,
    script: Vec<String>,
    image: Vec<String>,
    font: Vec<String>,
    other: Vec<String>,
}

impl ResourceInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the reference is empty or already present in any bucket.
    pub fn insert(&mut self, bucket: Bucket, reference: impl Into<String>) -> bool {
        let reference = reference.into();
        let trimmed = reference.trim();
        if trimmed.is_empty() || self.contains(trimmed) {
            return false;
        }
        let trimmed = trimmed.to_string();
        self.bucket_mut(bucket).push(trimmed);
        true
    }

    pub fn contains(&self, reference: &str) -> bool {
        Bucket::ALL
            .iter()
            .any(|bucket| self.get(*bucket).iter().any(|r| r == reference))
    }

    pub fn get(&self, bucket: Bucket) -> &[String] {
        match bucket {
            Bucket::Stylesheet => &self.stylesheet,
            Bucket::Script => &self.script,
            Bucket::Image => &self.image,
            Bucket::Font => &self.font,
            Bucket::Other => &self.other,
        }
    }

    fn bucket_mut(&mut self, bucket: Bucket) -> &mut Vec<String> {
        match bucket {
            Bucket::Stylesheet => &mut self.stylesheet,
            Bucket::Script => &mut self.script,
            Bucket::Image => &mut self.image,
            Bucket::Font => &mut self.font,
            Bucket::Other => &mut self.other,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Bucket, &str)> {
        Bucket::ALL.into_iter().flat_map(move |bucket| {
            self.get(bucket)
                .iter()
                .map(move |reference| (bucket, reference.as_str()))
        })
    }

    pub fn len(&self) -> usize {
        Bucket::ALL.iter().map(|b| self.get(*b).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A rendered page as captured from the browser session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    pub url: String,
    pub html: String,
    pub title: String,
    pub resources: ResourceInventory,
}

impl PageRecord {
    pub fn new(url: String, html: String, title: String, resources: ResourceInventory) -> Self {
        Self {
            url,
            html,
            title,
            resources,
        }
    }
}
