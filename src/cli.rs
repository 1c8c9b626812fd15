use std::fmt::Display;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::builder::styling::{AnsiColor, Color, Style, Styles};
use clap::{ArgAction, Args, ColorChoice, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::aot::{Generator, Shell, generate};
use clap_complete_nushell::Nushell;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use tracing::{debug, error, info};

use crate::cache::{Expiry, Memo, ModelStore, Stage};
use crate::config::{AtlasConfig, LayoutMethod};
use crate::pipeline::{KeywordStrategy, MapStrategy, Pipeline, SentenceStrategy};
use crate::{AppError, AppResult};

const STYLES: Styles = Styles::styled()
    .header(Style::new().bold())
    .usage(Style::new().bold())
    .error(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Red))))
    .literal(
        Style::new()
            .bold()
            .fg_color(Some(Color::Ansi(AnsiColor::Green))),
    )
    .placeholder(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Yellow))))
    .valid(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Cyan))))
    .invalid(Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightRed))))
    .context(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Magenta))))
    .context_value(
        Style::new()
            .bold()
            .fg_color(Some(Color::Ansi(AnsiColor::Cyan))),
    );

/// Long-form CLI description shown in `--help`.
const LONG_ABOUT: &str = "Topic Atlas - Explorable topic maps of annotated hotel reviews

This tool reads precomputed embeddings together with:
- a keyword table (item, count), filtered by a minimum frequency
- a review sentence table (sentiment, text) and a stopword list

It clusters each set into a fixed number of topics with seeded k-means, names
every topic after its three strongest terms, and writes a self-contained HTML
map that can be panned, zoomed and searched in any browser.";

/// Topic Atlas - Explorable topic maps of annotated hotel reviews.
#[derive(Parser, Debug, Clone)]
#[command(author, version, propagate_version = true, about, long_about = Some(LONG_ABOUT), styles = STYLES)]
pub struct Cli {
    /// Color choice for the output
    #[arg(long, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,

    /// Subcommand to run
    #[command(subcommand)]
    pub cmd: Cmd,
}

/// Top-level commands supported by the CLI.
#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// Build the keyword topic map
    Keywords {
        #[command(flatten)]
        common: CommonArgs,
        #[command(flatten)]
        inputs: InputArgs,
        /// Drop keywords counted fewer times than this
        #[arg(long)]
        min_freq: Option<u64>,
        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },

    /// Build the review sentence topic map
    Sentences {
        #[command(flatten)]
        common: CommonArgs,
        #[command(flatten)]
        inputs: InputArgs,
        /// Newline-delimited stopword list; `#` starts a comment line
        #[arg(long)]
        stopwords: Option<PathBuf>,
        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },

    /// Build both maps in one session
    ///
    /// A map that fails is reported and does not stop the other one.
    /// The exit status is non-zero if any map failed.
    All {
        #[command(flatten)]
        common: CommonArgs,
        #[command(flatten)]
        topics: VariantTopics,
        /// Directory the maps are written to
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
        /// Drop keywords counted fewer times than this
        #[arg(long)]
        min_freq: Option<u64>,
        /// Newline-delimited stopword list for the sentence map
        #[arg(long)]
        stopwords: Option<PathBuf>,
        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },

    /// Manage persisted topic models
    Cache {
        #[command(subcommand)]
        cmd: CacheCmd,
    },

    /// Generate shell completion for a given shell
    Completion {
        /// Output file to write the completion script to
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// The shell to generate the completion for
        #[arg(value_enum)]
        shell: CompletionShell,

        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum CacheCmd {
    /// Delete every persisted topic model
    Clear {
        /// TOML configuration file; only `[cache]` is read
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[command(flatten)]
        verbosity: Verbosity<InfoLevel>,
    },
}

/// Options shared by every map command.
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// TOML configuration file; missing keys keep their defaults
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of topics (K)
    #[arg(short = 'k', long)]
    pub topics: Option<usize>,

    /// Seed for k-means initialisation
    #[arg(long)]
    pub seed: Option<u64>,

    /// How embeddings are laid out on the map
    #[arg(long, value_enum)]
    pub layout: Option<LayoutMethod>,

    /// Neither read nor write persisted topic models
    #[arg(long = "no-cache", default_value_t = true, action = ArgAction::SetFalse)]
    pub cache: bool,
}

/// Input and output paths of a single map.
#[derive(Args, Debug, Clone, Default)]
pub struct InputArgs {
    /// Embedding matrix (.npy), one row per table row
    #[arg(long)]
    pub embeddings: Option<PathBuf>,

    /// Item table
    #[arg(long)]
    pub table: Option<PathBuf>,

    /// Where to write the HTML map
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Per-variant topic counts; each wins over `--topics` for its own map.
#[derive(Args, Debug, Clone, Default)]
pub struct VariantTopics {
    /// Number of topics for the keyword map
    #[arg(long)]
    pub keyword_topics: Option<usize>,

    /// Number of topics for the sentence map
    #[arg(long)]
    pub sentence_topics: Option<usize>,
}

impl VariantTopics {
    pub fn apply(&self, config: &mut AtlasConfig) {
        if let Some(k) = self.keyword_topics {
            config.keywords.n_topics = k;
        }
        if let Some(k) = self.sentence_topics {
            config.sentences.n_topics = k;
        }
    }
}

/// Supported completion targets for shell auto-completion.
#[derive(ValueEnum, Clone, Debug)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
    Nushell,
}

impl Display for CompletionShell {
    /// Render the canonical shell name string.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompletionShell::Bash => "bash",
            CompletionShell::Zsh => "zsh",
            CompletionShell::Fish => "fish",
            CompletionShell::PowerShell => "powershell",
            CompletionShell::Elvish => "elvish",
            CompletionShell::Nushell => "nushell",
        };
        write!(f, "{}", s)
    }
}

impl Generator for &CompletionShell {
    fn generate(&self, cmd: &clap::builder::Command, buf: &mut dyn Write) {
        match self {
            CompletionShell::Bash => Shell::Bash.generate(cmd, buf),
            CompletionShell::Zsh => Shell::Zsh.generate(cmd, buf),
            CompletionShell::Fish => Shell::Fish.generate(cmd, buf),
            CompletionShell::PowerShell => Shell::PowerShell.generate(cmd, buf),
            CompletionShell::Elvish => Shell::Elvish.generate(cmd, buf),
            CompletionShell::Nushell => Nushell.generate(cmd, buf),
        }
    }

    fn file_name(&self, name: &str) -> String {
        match self {
            CompletionShell::Bash => Shell::Bash.file_name(name),
            CompletionShell::Zsh => Shell::Zsh.file_name(name),
            CompletionShell::Fish => Shell::Fish.file_name(name),
            CompletionShell::PowerShell => Shell::PowerShell.file_name(name),
            CompletionShell::Elvish => Shell::Elvish.file_name(name),
            CompletionShell::Nushell => Nushell.file_name(name),
        }
    }
}

/// Helper trait for accessing verbosity flags on commands.
pub trait GetVerbosity {
    fn get_verbosity(&self) -> &Verbosity<InfoLevel>;
}

impl GetVerbosity for Cmd {
    fn get_verbosity(&self) -> &Verbosity<InfoLevel> {
        match self {
            Cmd::Keywords { verbosity, .. } => verbosity,
            Cmd::Sentences { verbosity, .. } => verbosity,
            Cmd::All { verbosity, .. } => verbosity,
            Cmd::Cache { cmd } => cmd.get_verbosity(),
            Cmd::Completion { verbosity, .. } => verbosity,
        }
    }
}

impl GetVerbosity for CacheCmd {
    fn get_verbosity(&self) -> &Verbosity<InfoLevel> {
        match self {
            CacheCmd::Clear { verbosity, .. } => verbosity,
        }
    }
}

fn read_config(path: Option<&Path>) -> AppResult<AtlasConfig> {
    match path {
        Some(path) => AtlasConfig::from_file(path),
        None => Ok(AtlasConfig::default()),
    }
}

impl CommonArgs {
    /// Defaults, then the config file, then the flags shared by every map.
    pub fn config(&self) -> AppResult<AtlasConfig> {
        let mut config = read_config(self.config.as_deref())?;
        if let Some(k) = self.topics {
            config.keywords.n_topics = k;
            config.sentences.n_topics = k;
        }
        if let Some(seed) = self.seed {
            config.clustering.seed = seed;
        }
        if let Some(method) = self.layout {
            config.layout.method = method;
        }
        if !self.cache {
            config.cache.persist = false;
        }
        Ok(config)
    }
}

impl Cmd {
    /// Execute the chosen top-level command.
    #[tracing::instrument(name = "Running command", level = "debug", skip(self))]
    pub fn run(&self) -> AppResult<()> {
        match self {
            Cmd::Keywords {
                common,
                inputs,
                min_freq,
                ..
            } => {
                let mut config = common.config()?;
                let keywords = &mut config.keywords;
                override_path(&mut keywords.embeddings, &inputs.embeddings);
                override_path(&mut keywords.table, &inputs.table);
                if let Some(min_freq) = min_freq {
                    keywords.min_freq = *min_freq;
                }
                let strategy = KeywordStrategy {
                    config: config.keywords.clone(),
                };
                let maps: [(&dyn MapStrategy, PathBuf); 1] =
                    [(&strategy, output_for(&strategy, inputs, None))];
                run_maps(&config, &maps)
            }
            Cmd::Sentences {
                common,
                inputs,
                stopwords,
                ..
            } => {
                let mut config = common.config()?;
                let sentences = &mut config.sentences;
                override_path(&mut sentences.embeddings, &inputs.embeddings);
                override_path(&mut sentences.table, &inputs.table);
                override_path(&mut sentences.stopwords, stopwords);
                let strategy = SentenceStrategy {
                    config: config.sentences.clone(),
                };
                let maps: [(&dyn MapStrategy, PathBuf); 1] =
                    [(&strategy, output_for(&strategy, inputs, None))];
                run_maps(&config, &maps)
            }
            Cmd::All {
                common,
                topics,
                out_dir,
                min_freq,
                stopwords,
                ..
            } => {
                let mut config = common.config()?;
                topics.apply(&mut config);
                if let Some(min_freq) = min_freq {
                    config.keywords.min_freq = *min_freq;
                }
                override_path(&mut config.sentences.stopwords, stopwords);
                let keywords = KeywordStrategy {
                    config: config.keywords.clone(),
                };
                let sentences = SentenceStrategy {
                    config: config.sentences.clone(),
                };
                let none = InputArgs::default();
                let maps: [(&dyn MapStrategy, PathBuf); 2] = [
                    (&keywords, output_for(&keywords, &none, Some(out_dir))),
                    (&sentences, output_for(&sentences, &none, Some(out_dir))),
                ];
                run_maps(&config, &maps)
            }
            Cmd::Cache {
                cmd: CacheCmd::Clear { config, .. },
            } => {
                let config = read_config(config.as_deref())?;
                let store = ModelStore::new(config.cache.model_dir()?);
                let removed = store.clear()?;
                info!(
                    "Removed {removed} cached topic model(s) from {}",
                    store.dir().display()
                );
                Ok(())
            }
            Cmd::Completion { shell, output, .. } => {
                let mut cmd = Cli::command();
                if let Some(output_path) = output {
                    let mut file = std::fs::OpenOptions::new()
                        .write(true)
                        .truncate(true)
                        .create(true)
                        .open(output_path)?;
                    generate(shell, &mut cmd, "topic-atlas", &mut file);
                    info!(
                        "Generated completion script for {} at {}",
                        shell,
                        output_path.display()
                    );
                } else {
                    generate(shell, &mut cmd, "topic-atlas", &mut std::io::stdout());
                }
                Ok(())
            }
        }
    }
}

fn override_path(target: &mut PathBuf, value: &Option<PathBuf>) {
    if let Some(value) = value {
        *target = value.clone();
    }
}

fn output_for(strategy: &dyn MapStrategy, inputs: &InputArgs, dir: Option<&PathBuf>) -> PathBuf {
    match (&inputs.output, dir) {
        (Some(output), _) => output.clone(),
        (None, Some(dir)) => dir.join(strategy.default_output()),
        (None, None) => PathBuf::from(strategy.default_output()),
    }
}

/// Run every map against one memo table; a failed map does not stop the rest.
fn run_maps(config: &AtlasConfig, maps: &[(&dyn MapStrategy, PathBuf)]) -> AppResult<()> {
    config.validate()?;
    let memo = Memo::default().with_expiry(Stage::Load, Expiry::After(config.cache.load_ttl()?));
    let store = if config.cache.persist {
        Some(ModelStore::new(config.cache.model_dir()?))
    } else {
        None
    };
    let mut pipeline = Pipeline::new(config, &memo);
    if let Some(store) = &store {
        pipeline = pipeline.with_store(store);
    }

    let result = if let [(strategy, output)] = maps {
        pipeline.run(*strategy, output).map(|_| ())
    } else {
        let mut failed = Vec::new();
        for (strategy, output) in maps {
            if let Err(e) = pipeline.run(*strategy, output) {
                error!("The {} map was not produced. {e}", strategy.name());
                failed.push(strategy.name().to_string());
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(AppError::MapsFailed {
                failed,
                total: maps.len(),
            })
        }
    };

    let stats = memo.stats();
    debug!(
        entries = memo.len(),
        hits = stats.hits,
        misses = stats.misses,
        expired = stats.expired,
        "Memo statistics"
    );
    result
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_the_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[keywords]\nn_topics = 12\n\n[clustering]\nseed = 3").unwrap();

        let cli = Cli::try_parse_from([
            "topic-atlas",
            "keywords",
            "--config",
            file.path().to_str().unwrap(),
            "--seed",
            "9",
            "--no-cache",
            "--layout",
            "pca",
        ])
        .unwrap();
        let Cmd::Keywords { common, .. } = cli.cmd else {
            panic!("expected the keywords command");
        };
        let config = common.config().unwrap();
        assert_eq!(config.keywords.n_topics, 12);
        assert_eq!(config.clustering.seed, 9);
        assert_eq!(config.layout.method, LayoutMethod::Pca);
        assert!(!config.cache.persist);
    }

    #[test]
    fn topics_flag_sets_both_variants() {
        let common = CommonArgs {
            topics: Some(7),
            cache: true,
            ..CommonArgs::default()
        };
        let config = common.config().unwrap();
        assert_eq!(config.keywords.n_topics, 7);
        assert_eq!(config.sentences.n_topics, 7);
        assert!(config.cache.persist);
    }

    #[test]
    fn all_takes_a_topic_count_per_variant() {
        let cli = Cli::try_parse_from([
            "topic-atlas",
            "all",
            "--topics",
            "8",
            "--keyword-topics",
            "25",
            "--no-cache",
        ])
        .unwrap();
        let Cmd::All { common, topics, .. } = cli.cmd else {
            panic!("expected the all command");
        };
        let mut config = common.config().unwrap();
        topics.apply(&mut config);
        assert_eq!(config.keywords.n_topics, 25);
        assert_eq!(config.sentences.n_topics, 8);

        let only_sentences = VariantTopics {
            sentence_topics: Some(12),
            ..VariantTopics::default()
        };
        let mut config = AtlasConfig::default();
        only_sentences.apply(&mut config);
        assert_eq!(config.keywords.n_topics, 30);
        assert_eq!(config.sentences.n_topics, 12);
    }

    #[test]
    fn output_defaults_follow_the_variant() {
        let keywords = KeywordStrategy {
            config: Default::default(),
        };
        let none = InputArgs::default();
        assert_eq!(output_for(&keywords, &none, None), PathBuf::from("keywords.html"));
        assert_eq!(
            output_for(&keywords, &none, Some(&PathBuf::from("out"))),
            PathBuf::from("out/keywords.html")
        );
        let explicit = InputArgs {
            output: Some(PathBuf::from("map.html")),
            ..InputArgs::default()
        };
        assert_eq!(output_for(&keywords, &explicit, None), PathBuf::from("map.html"));
    }

    #[test]
    fn all_reports_failed_maps_and_keeps_going() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AtlasConfig::default();
        config.cache.persist = false;
        config.keywords.embeddings = dir.path().join("missing.npy");
        config.sentences.embeddings = dir.path().join("missing-too.npy");
        let keywords = KeywordStrategy {
            config: config.keywords.clone(),
        };
        let sentences = SentenceStrategy {
            config: config.sentences.clone(),
        };
        let maps: [(&dyn MapStrategy, PathBuf); 2] = [
            (&keywords, dir.path().join("k.html")),
            (&sentences, dir.path().join("s.html")),
        ];
        let err = run_maps(&config, &maps).unwrap_err();
        match err {
            AppError::MapsFailed { failed, total } => {
                assert_eq!(failed, vec!["keywords", "sentences"]);
                assert_eq!(total, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
