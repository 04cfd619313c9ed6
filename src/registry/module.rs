use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub type ModuleId = String;

/// Functional category of a module, used as the key into the compatibility matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Core,
    Security,
    Performance,
    Integration,
    Language,
    Framework,
    Experimental,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Core,
        Category::Security,
        Category::Performance,
        Category::Integration,
        Category::Language,
        Category::Framework,
        Category::Experimental,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Core => "core",
            Category::Security => "security",
            Category::Performance => "performance",
            Category::Integration => "integration",
            Category::Language => "language",
            Category::Framework => "framework",
            Category::Experimental => "experimental",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Size class decides whether a payload goes through compression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    #[default]
    Small,
    Medium,
    Large,
}

impl SizeClass {
    pub fn is_compressible(&self) -> bool {
        !matches!(self, SizeClass::Small)
    }
}

/// Module metadata. The payload itself lives in a `ContentStore`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub id: ModuleId,
    pub category: Category,
    #[serde(default)]
    pub size_class: SizeClass,
    #[serde(default)]
    pub dependencies: BTreeSet<ModuleId>,
    #[serde(default = "default_format_version")]
    pub format_version: String,
    /// Capability tags that at most one module in a combination may claim
    #[serde(default)]
    pub exclusive_capabilities: BTreeSet<String>,
    /// Pinned versions of dependencies; `*` accepts any version
    #[serde(default)]
    pub dependency_versions: BTreeMap<ModuleId, String>,
}

fn default_format_version() -> String {
    "1.0".to_string()
}

impl Module {
    pub fn new(id: impl Into<String>, category: Category) -> Self {
        Self {
            id: id.into(),
            category,
            size_class: SizeClass::Small,
            dependencies: BTreeSet::new(),
            format_version: default_format_version(),
            exclusive_capabilities: BTreeSet::new(),
            dependency_versions: BTreeMap::new(),
        }
    }

    pub fn with_size(mut self, size_class: SizeClass) -> Self {
        self.size_class = size_class;
        self
    }

    pub fn with_dep(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.insert(dep.into());
        self
    }

    pub fn with_deps<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Pin a dependency version. Also adds the dependency edge.
    pub fn with_dep_version(mut self, dep: impl Into<String>, version: impl Into<String>) -> Self {
        let dep = dep.into();
        self.dependencies.insert(dep.clone());
        self.dependency_versions.insert(dep, version.into());
        self
    }

    pub fn with_format_version(mut self, version: impl Into<String>) -> Self {
        self.format_version = version.into();
        self
    }

    pub fn with_capability(mut self, tag: impl Into<String>) -> Self {
        self.exclusive_capabilities.insert(tag.into());
        self
    }

    /// Leading numeric component of `format_version`, if any
    pub fn format_major(&self) -> Option<u64> {
        self.format_version
            .trim_start_matches('v')
            .split('.')
            .next()
            .and_then(|major| major.trim().parse().ok())
    }
}
