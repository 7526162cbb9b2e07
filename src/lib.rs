pub mod analysis;
pub mod cli;
pub mod config;
pub mod corpus;
pub mod env;
pub mod error;
pub mod fs;
pub mod manifest;
pub mod pipeline;
pub mod probe;
pub mod report;
pub mod revision;
pub mod stage;

use anyhow::Result;

use analysis::command::CommandAnalyzer;
use analysis::registry::RuleRegistry;
use cli::Args;
use config::load_config;
use corpus::resolve_corpus;
use env::LibraryEnvironment;
use error::CompareError;
use pipeline::Comparison;
use probe::Prober;
use revision::{GitCheckout, RevisionController};

/// Run a comparison. Returns the process exit code on success; errors carry
/// a [`CompareError`] when they map to a specific exit code.
pub fn run(args: Args) -> Result<i32> {
    let config_path = args.config_path();
    let config = load_config(&config_path, args.config.is_some())
        .map_err(|e| CompareError::config(format!("{e:#}")))?;
    match config.config_path() {
        Some(path) => tracing::debug!(path = %path.display(), "config loaded"),
        None => tracing::debug!("no config file found, using defaults"),
    }

    let registry = RuleRegistry::from_config(&config);

    // --list-rules: print all registered rules and exit
    if args.list_rules {
        let mut rules: Vec<_> = registry.rules().iter().collect();
        rules.sort_by(|a, b| a.name().cmp(b.name()));
        for rule in rules {
            if rule.dependency_sensitive() {
                println!("{} (dependency-sensitive)", rule.name());
            } else {
                println!("{}", rule.name());
            }
        }
        return Ok(0);
    }

    // Everything the user could have gotten wrong is checked before the
    // checkout is touched.
    let (baseline, candidate) = args.revisions()?;
    let corpus = args.corpus_spec()?;
    let requested = if args.rules.is_empty() {
        config.default_rules()
    } else {
        args.rules.as_slice()
    };
    let rules = registry.resolve(requested)?;
    let targets = resolve_corpus(&corpus, config.manifest_files(), args.sampling())?;
    let output = args.output_path();

    tracing::info!(
        baseline = %baseline,
        candidate = %candidate,
        packages = targets.len(),
        rules = rules.len(),
        "starting comparison"
    );
    for target in &targets {
        tracing::debug!(package = %target, "selected");
    }

    let environment = LibraryEnvironment::from_config(&config);
    let prober = Prober::from_config(&config, &environment)
        .map_err(|e| CompareError::config(format!("{e:#}")))?;
    let analyzer = CommandAnalyzer::from_command_line(&args.analyzer_cmd, &args.repo)
        .map_err(|e| CompareError::config(format!("{e:#}")))?;
    let checkout = GitCheckout::new(&args.repo, &args.remote);

    let report = {
        let mut controller = RevisionController::acquire(&checkout)?;
        Comparison::new(&targets, &rules, &analyzer, &prober).run(
            &mut controller,
            &baseline,
            &candidate,
        )?
    };

    report.export(&output)?;
    report.print_summary(&mut std::io::stdout().lock())?;
    println!("dataset written to {}", output.display());
    Ok(0)
}
