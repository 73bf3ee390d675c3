//! End-to-end run: compile, plan, reconcile, execute.

use super::compiler::ScriptCompiler;
use super::config::{MigrationConfig, DEFAULT_REPORT_DIR};
use super::confirm::Confirm;
use super::diagnostics::Diagnostics;
use super::executor::{MigrationExecutor, MigrationReport};
use super::planner::TaskPlanner;
use super::reconciler::{FileReconciler, ReconcileOutcome};
use crate::crypto::Cipher;
use crate::error::{Error, Result};
use crate::script::{Script, StoreKind, StoreSelector};
use crate::store::{FileStore, StoreHandle};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Directory of a file target when its selector names no path.
pub const DEFAULT_TARGET_DIR: &str = "target";

/// Open the store a selector names.
///
/// Paths are relative to `base`; `default_dir` is used when the selector
/// has none. Live stores need a connector supplied by the embedder.
pub fn open_store(
    selector: &StoreSelector,
    base: &Path,
    default_dir: &Path,
    script: &Script,
    password: Option<&str>,
) -> Result<StoreHandle> {
    let name = if selector.name.is_empty() {
        selector.kind.to_string()
    } else {
        selector.name.clone()
    };
    match selector.kind {
        StoreKind::Live => Err(Error::Config(format!(
            "store {name} is live; live stores must be attached by the embedding application"
        ))),
        StoreKind::File => {
            let dir = match &selector.path {
                Some(path) => base.join(path),
                None => default_dir.to_path_buf(),
            };
            let mut store = FileStore::open(dir.clone())?;
            if script.encrypt_data_files {
                let password = password.ok_or_else(|| {
                    Error::Config("encryptDataFiles requires a password".to_string())
                })?;
                store = store.with_cipher(Cipher::for_files(password)?);
            }
            Ok(StoreHandle::file(name, store)
                .with_base_path(dir)
                .with_credentials(selector.credentials())
                .with_api_version(script.api_version.clone())
                .with_batch_size(script.bulk_threshold)
                .with_polling_interval(Duration::from_millis(script.polling_interval_ms)))
        }
    }
}

/// Runs a script between two stores.
#[derive(Debug)]
pub struct MigrationRunner {
    script: Script,
    source: StoreHandle,
    target: StoreHandle,
    config: MigrationConfig,
    password: Option<String>,
}

impl MigrationRunner {
    /// Create a runner over explicit store handles.
    ///
    /// The script's bulk threshold becomes the batch size of both handles.
    pub fn new(script: Script, mut source: StoreHandle, mut target: StoreHandle) -> Self {
        source.set_batch_size(script.bulk_threshold);
        target.set_batch_size(script.bulk_threshold);
        let config = MigrationConfig::from_script(&script);
        Self {
            script,
            source,
            target,
            config,
            password: None,
        }
    }

    /// Create a runner whose stores come from the script's selectors,
    /// resolved against the run directory.
    pub fn from_script(script: Script, base: &Path, password: Option<String>) -> Result<Self> {
        let source = open_store(&script.source, base, base, &script, password.as_deref())?;
        let target = open_store(
            &script.target,
            base,
            &base.join(DEFAULT_TARGET_DIR),
            &script,
            password.as_deref(),
        )?;
        let config = MigrationConfig::from_script(&script).with_report_dir(base.join(DEFAULT_REPORT_DIR));
        Ok(Self::new(script, source, target)
            .with_config(config)
            .with_password(password))
    }

    pub fn with_config(mut self, config: MigrationConfig) -> Self {
        self.config = config;
        self
    }

    /// Password for encrypted credentials.
    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut MigrationConfig {
        &mut self.config
    }

    pub fn source(&self) -> &StoreHandle {
        &self.source
    }

    pub fn target(&self) -> &StoreHandle {
        &self.target
    }

    /// Run the script.
    pub fn run(&mut self, confirm: &mut dyn Confirm) -> Result<MigrationReport> {
        info!(
            source = %self.source.name(),
            target = %self.target.name(),
            objects = self.script.objects.len(),
            "migration started"
        );
        let graph = ScriptCompiler::new(&self.script, &mut self.source, &mut self.target)
            .with_password(self.password.as_deref())
            .compile()?;
        let job = TaskPlanner::plan(graph)?;
        let order: Vec<String> = job.execution_order().into_iter().map(str::to_string).collect();
        info!(order = %order.join(", "), "execution order");

        let mut diagnostics = Diagnostics::new(&self.config.report_dir);
        if let Some(store) = self.source.file_store() {
            let outcome = FileReconciler::new(&job, store, &self.config).reconcile(&mut diagnostics, confirm);
            match outcome {
                Ok(ReconcileOutcome::Continue) => {}
                Ok(ReconcileOutcome::ValidatedOnly) => return Ok(MigrationReport::validated(order)),
                Err(err) => {
                    if let Err(flush_err) = diagnostics.flush() {
                        warn!(error = %flush_err, "could not write reports");
                    }
                    return Err(err);
                }
            }
        } else if self.config.validate_only {
            info!("live source, nothing to validate");
            return Ok(MigrationReport::validated(order));
        }

        MigrationExecutor::new(
            &job,
            &mut self.source,
            &mut self.target,
            &self.config,
            &mut diagnostics,
            confirm,
        )
        .run()
    }
}
