//! Catalog Store
//!
//! The catalog is published as an immutable [`CatalogSnapshot`]. Readers take
//! an `Arc` to the current snapshot without locking; `reload` swaps in a new
//! one atomically, so a request that already holds a snapshot keeps seeing a
//! consistent App/Function pair until it finishes.

use arc_swap::ArcSwap;
use conduit_core::{
    App, ConduitResult, Function, ParameterGroup, Protocol, StorageError,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

/// On-disk catalog layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogDocument {
    #[serde(default)]
    pub apps: Vec<App>,
    #[serde(default)]
    pub functions: Vec<Function>,
}

/// One validated, immutable view of every App and Function.
#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    apps: HashMap<String, Arc<App>>,
    functions: HashMap<String, Arc<Function>>,
    /// App name -> function names, sorted.
    by_app: BTreeMap<String, Vec<String>>,
}

fn invalid(reason: impl Into<String>) -> StorageError {
    StorageError::InvalidCatalog {
        reason: reason.into(),
    }
}

impl CatalogSnapshot {
    /// Validate and index a catalog.
    ///
    /// Rejects duplicate names, functions without an `APP__` prefix naming a
    /// known App, and REST path placeholders with no matching path field.
    pub fn build(apps: Vec<App>, functions: Vec<Function>) -> ConduitResult<Self> {
        let mut snapshot = CatalogSnapshot::default();

        for app in apps {
            if app.name.trim().is_empty() {
                return Err(invalid("app with empty name").into());
            }
            if let Some(creds) = app
                .default_credentials
                .iter()
                .find(|c| !app.supports(c.kind()))
            {
                return Err(invalid(format!(
                    "app {} has default credentials for unsupported scheme {}",
                    app.name,
                    creds.kind()
                ))
                .into());
            }
            let name = app.name.clone();
            if snapshot.apps.insert(name.clone(), Arc::new(app)).is_some() {
                return Err(invalid(format!("duplicate app {}", name)).into());
            }
            snapshot.by_app.entry(name).or_default();
        }

        for function in functions {
            let app_name = function
                .app_name()
                .ok_or_else(|| invalid(format!("function {} has no app prefix", function.name)))?
                .to_string();
            if !snapshot.apps.contains_key(&app_name) {
                return Err(invalid(format!(
                    "function {} references unknown app {}",
                    function.name, app_name
                ))
                .into());
            }
            validate_protocol(&function)?;

            let name = function.name.clone();
            if snapshot
                .functions
                .insert(name.clone(), Arc::new(function))
                .is_some()
            {
                return Err(invalid(format!("duplicate function {}", name)).into());
            }
            snapshot.by_app.entry(app_name).or_default().push(name);
        }

        for names in snapshot.by_app.values_mut() {
            names.sort();
        }
        Ok(snapshot)
    }

    pub fn from_document(document: CatalogDocument) -> ConduitResult<Self> {
        Self::build(document.apps, document.functions)
    }

    pub fn from_json(raw: &str) -> ConduitResult<Self> {
        let document: CatalogDocument = serde_json::from_str(raw).map_err(|e| {
            StorageError::Serialization {
                reason: e.to_string(),
            }
        })?;
        Self::from_document(document)
    }

    pub fn app(&self, name: &str) -> Option<&Arc<App>> {
        self.apps.get(name)
    }

    pub fn function(&self, name: &str) -> Option<&Arc<Function>> {
        self.functions.get(name)
    }

    /// Function and its owning App, read from this one snapshot.
    pub fn function_with_app(&self, name: &str) -> Option<(Arc<Function>, Arc<App>)> {
        let function = self.functions.get(name)?;
        let app = self.apps.get(function.app_name()?)?;
        Some((Arc::clone(function), Arc::clone(app)))
    }

    /// Functions of one App, sorted by name. Unknown apps yield nothing.
    pub fn functions_for_app(&self, app_name: &str) -> Vec<Arc<Function>> {
        self.by_app
            .get(app_name)
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| self.functions.get(n).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every function, grouped by App and sorted by name.
    pub fn all_functions(&self) -> Vec<Arc<Function>> {
        self.by_app
            .keys()
            .flat_map(|app| self.functions_for_app(app))
            .collect()
    }

    pub fn app_count(&self) -> usize {
        self.apps.len()
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }
}

fn validate_protocol(function: &Function) -> Result<(), StorageError> {
    match &function.protocol {
        Protocol::Rest(rest) => {
            let path_group = function.parameters.group(ParameterGroup::Path);
            for placeholder in rest.placeholders() {
                let declared = path_group.is_some_and(|g| g.field(placeholder).is_some());
                if !declared {
                    return Err(invalid(format!(
                        "function {} path placeholder {{{}}} has no path field",
                        function.name, placeholder
                    )));
                }
            }
            if rest.server_url.trim().is_empty() {
                return Err(invalid(format!("function {} has no server_url", function.name)));
            }
            Ok(())
        }
        Protocol::Connector(connector) => {
            if connector.handler.trim().is_empty() {
                return Err(invalid(format!(
                    "function {} has an empty connector handler",
                    function.name
                )));
            }
            Ok(())
        }
    }
}

/// Process-wide, read-mostly catalog.
#[derive(Debug)]
pub struct CatalogStore {
    current: ArcSwap<CatalogSnapshot>,
}

impl Default for CatalogStore {
    fn default() -> Self {
        Self::new(CatalogSnapshot::default())
    }
}

impl CatalogStore {
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
        }
    }

    pub fn from_json(raw: &str) -> ConduitResult<Self> {
        Ok(Self::new(CatalogSnapshot::from_json(raw)?))
    }

    /// The current snapshot. Hold it for the whole request.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.current.load_full()
    }

    pub fn get_app(&self, name: &str) -> Option<Arc<App>> {
        self.current.load().app(name).cloned()
    }

    pub fn get_function(&self, name: &str) -> Option<Arc<Function>> {
        self.current.load().function(name).cloned()
    }

    pub fn list_functions(&self, app_name: &str) -> Vec<Arc<Function>> {
        self.current.load().functions_for_app(app_name)
    }

    /// Atomically publish a new snapshot.
    pub fn reload(&self, snapshot: CatalogSnapshot) {
        tracing::info!(
            apps = snapshot.app_count(),
            functions = snapshot.function_count(),
            "Catalog snapshot published"
        );
        self.current.store(Arc::new(snapshot));
    }

    /// Read, validate and publish a catalog file. The old snapshot stays live
    /// on any error.
    pub fn reload_from_file(&self, path: impl AsRef<Path>) -> ConduitResult<()> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            invalid(format!("cannot read {}: {}", path.display(), e))
        })?;
        let snapshot = CatalogSnapshot::from_json(&raw)?;
        self.reload(snapshot);
        Ok(())
    }
}
