//! Whole-program build driver.
//!
//! A [`Pipeline`] run goes through four stages:
//!
//! 1. **SSA** - every method body is converted to SSA form, or loaded from the
//!    disk cache when an entry for the exact input exists
//! 2. **Analysis** - the dependency analyzer starts from the entry points and runs
//!    to a fixpoint; cacheable SSA programs are stored afterwards
//! 3. **Linking** - unreachable classes and members are dropped, call sites are
//!    retargeted and class initialization markers inserted
//! 4. **Transforms** - inlining, class-init lowering and exception lowering, each
//!    as a [`ProgramPass`] over all surviving methods
//!
//! Per-method stages run on the rayon pool when [`PipelineConfig::parallel`] is
//! set; the analysis is single-threaded. Diagnostics never abort a stage: the run
//! fails with [`crate::Error::BuildFailed`] once analysis is over if any error
//! was recorded.

use rayon::prelude::*;
use tracing::debug;

use crate::{
    analysis::SsaTransformer,
    cache::{CacheKey, CacheStats, DiskProgramCache},
    callgraph::CallGraph,
    compiler::{
        events::EventKind,
        pass::ProgramPass,
        passes::{CallSiteDescriptor, ClassInitPass, InliningPass, ShadowStackPass},
        PipelineConfig, Session,
    },
    dependency::{
        BootstrapMethodSubstitutor, BootstrapRegistry, DependencyAnalyzer, DependencyInfo,
        DependencyPlugin, LinkStats, Linker, PluginRegistry,
    },
    model::{ClassSet, ClassSource, MethodHolder, MethodReference},
    Error, Result,
};

/// Everything a successful build produces.
#[derive(Debug)]
pub struct BuildOutput {
    /// Linked and transformed classes
    pub classes: ClassSet,
    /// Points-to results of the analysis
    pub info: DependencyInfo,
    /// Call graph discovered by the analysis
    pub call_graph: CallGraph,
    /// Shadow stack call sites, ordered by id; empty without exception lowering
    pub call_sites: Vec<CallSiteDescriptor>,
    /// Linker counters
    pub link_stats: LinkStats,
    /// Cache counters, when a cache directory was configured
    pub cache_stats: Option<CacheStats>,
}

/// Runs SSA construction, analysis, linking and lowering over a class set.
pub struct Pipeline {
    config: PipelineConfig,
    plugins: PluginRegistry,
    bootstrap: BootstrapRegistry,
}

impl Pipeline {
    /// Creates a pipeline with the given settings and no plugins.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            plugins: PluginRegistry::new(),
            bootstrap: BootstrapRegistry::new(),
        }
    }

    /// Replaces the plugin registry handed to the analyzer.
    #[must_use]
    pub fn with_plugins(mut self, plugins: PluginRegistry) -> Self {
        self.plugins = plugins;
        self
    }

    /// Replaces the bootstrap substitutor registry handed to the analyzer.
    #[must_use]
    pub fn with_bootstrap(mut self, bootstrap: BootstrapRegistry) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    /// Registers a plugin for a method without body.
    pub fn register_plugin(
        &mut self,
        method: MethodReference,
        plugin: impl DependencyPlugin + 'static,
    ) {
        self.plugins.register(method, plugin);
    }

    /// Registers a substitutor for dynamic call sites bootstrapped by `bootstrap`.
    pub fn register_bootstrap(
        &mut self,
        bootstrap: MethodReference,
        substitutor: impl BootstrapMethodSubstitutor + 'static,
    ) {
        self.bootstrap.register(bootstrap, substitutor);
    }

    /// The settings of this pipeline.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Builds `classes` starting from `entry_points`.
    ///
    /// # Errors
    ///
    /// - [`Error::BuildFailed`] with every error diagnostic if the analysis
    ///   reported problems
    /// - [`Error::Ssa`] if a method body cannot be put in SSA form
    /// - [`Error::FileError`] if the cache directory is not usable
    /// - any error returned by a transformation pass
    pub fn run(
        self,
        session: &Session,
        mut classes: ClassSet,
        entry_points: &[MethodReference],
    ) -> Result<BuildOutput> {
        let Pipeline {
            config,
            plugins,
            bootstrap,
        } = self;

        let cache = config
            .cache_directory
            .as_ref()
            .map(|directory| DiskProgramCache::open(directory, session))
            .transpose()?;

        let misses = construct_ssa(session, &mut classes, cache.as_ref(), config.parallel)?;

        let mut analyzer = DependencyAnalyzer::new(session, classes)
            .with_plugins(plugins)
            .with_bootstrap(bootstrap);
        for entry in entry_points {
            analyzer.analyze_method(entry);
        }
        let (mut classes, mut info) = analyzer.finish();
        debug!(
            reachable = info.reachable_methods().len(),
            classes = info.reachable_classes().len(),
            "dependency analysis finished"
        );
        check_errors(session)?;

        if let Some(cache) = &cache {
            let mut stored = 0;
            for (method, key) in &misses {
                if !session.is_cacheable(method) {
                    continue;
                }
                let program = classes
                    .get(&method.class_name)
                    .and_then(|class| class.method(&method.descriptor))
                    .and_then(|holder| holder.program.as_ref());
                if let Some(program) = program {
                    cache.store(session, key, program)?;
                    stored += 1;
                }
            }
            cache.flush(session)?;
            debug!(stored, "program cache updated");
        }

        let link_stats = Linker::new(&info, session).link(&mut classes);
        debug!(?link_stats, "linking finished");

        if config.inlining {
            let snapshot = classes.clone();
            let pass = InliningPass::new(&snapshot, config.inlining_config);
            run_pass(&pass, &mut classes, session, config.parallel)?;
        }
        if config.lower_class_init {
            run_pass(&ClassInitPass::new(), &mut classes, session, config.parallel)?;
        }
        let mut call_sites = Vec::new();
        if config.lower_exceptions {
            let pass = ShadowStackPass::new();
            run_pass(&pass, &mut classes, session, config.parallel)?;
            call_sites = pass.call_sites();
        }
        check_errors(session)?;

        Ok(BuildOutput {
            classes,
            call_graph: info.take_call_graph(),
            info,
            call_sites,
            link_stats,
            cache_stats: cache.as_ref().map(DiskProgramCache::stats),
        })
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("plugins", &self.plugins.len())
            .finish_non_exhaustive()
    }
}

fn methods_with_programs(classes: &mut ClassSet) -> Vec<&mut MethodHolder> {
    classes
        .iter_mut()
        .flat_map(|class| class.methods.values_mut())
        .filter(|holder| holder.program.is_some())
        .collect()
}

/// Converts every body to SSA form and returns the methods that were not found in
/// the cache, with their keys.
fn construct_ssa(
    session: &Session,
    classes: &mut ClassSet,
    cache: Option<&DiskProgramCache>,
    parallel: bool,
) -> Result<Vec<(MethodReference, CacheKey)>> {
    let build = |holder: &mut &mut MethodHolder| -> Result<Option<(MethodReference, CacheKey)>> {
        let method = holder.reference();
        let Some(program) = holder.program.as_mut() else {
            return Ok(None);
        };
        let key = cache
            .map(|cache| cache.key(session, &method, program))
            .transpose()?;
        if let (Some(cache), Some(key)) = (cache, &key) {
            if let Some(cached) = cache.load(session, key) {
                *program = cached;
                session.events.record(EventKind::CacheHit).method(&method);
                return Ok(None);
            }
            session.events.record(EventKind::CacheMiss).method(&method);
        }
        SsaTransformer::transform(program, &holder.descriptor.parameters)?;
        session.events.record(EventKind::SsaConstructed).method(&method);
        Ok(key.map(|key| (method, key)))
    };

    let mut methods = methods_with_programs(classes);
    let results: Vec<_> = if parallel {
        methods.par_iter_mut().map(build).collect::<Result<_>>()?
    } else {
        methods.iter_mut().map(build).collect::<Result<_>>()?
    };
    Ok(results.into_iter().flatten().collect())
}

/// Runs `pass` over every method with a body and returns the number of methods it
/// changed.
fn run_pass(
    pass: &dyn ProgramPass,
    classes: &mut ClassSet,
    session: &Session,
    parallel: bool,
) -> Result<usize> {
    session
        .events
        .record(EventKind::PassStarted)
        .pass(pass.name())
        .message(pass.description());

    let apply = |holder: &mut &mut MethodHolder| -> Result<bool> {
        let method = holder.reference();
        match holder.program.as_mut() {
            Some(program) => pass.run_on_method(program, &method, session),
            None => Ok(false),
        }
    };
    let mut methods = methods_with_programs(classes);
    let changed: Vec<bool> = if parallel {
        methods.par_iter_mut().map(apply).collect::<Result<_>>()?
    } else {
        methods.iter_mut().map(apply).collect::<Result<_>>()?
    };
    let changed = changed.into_iter().filter(|changed| *changed).count();

    session
        .events
        .record(EventKind::PassCompleted)
        .pass(pass.name())
        .message(format!("{changed} methods changed"));
    debug!(pass = pass.name(), changed, "pass completed");
    Ok(changed)
}

fn check_errors(session: &Session) -> Result<()> {
    if session.events.has_errors() {
        let errors = session.events.errors().map(ToString::to_string).collect();
        return Err(Error::BuildFailed(errors));
    }
    Ok(())
}
