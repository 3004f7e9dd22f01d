//! The `capforge models` command for managing downloaded models.

use capforge_core::caption::blip;
use capforge_core::config::STACKED_TAGGER_REPOS;
use capforge_core::hub::MAIN_REVISION;
use capforge_core::summarize::local;
use capforge_core::tagger::{MODEL_FILENAME, TAGS_FILENAME};
use capforge_core::{Config, ModelHub};
use clap::{Args, Subcommand, ValueEnum};

/// Arguments for the `models` command.
#[derive(Args, Debug)]
pub struct ModelsArgs {
    #[command(subcommand)]
    pub command: ModelsCommand,
}

/// Subcommands for model management.
#[derive(Subcommand, Debug)]
pub enum ModelsCommand {
    /// Download model files ahead of a run
    Download {
        /// Which models to fetch
        #[arg(value_enum, default_value_t = ModelGroup::All)]
        group: ModelGroup,
    },

    /// List known model files and whether they are cached
    List,

    /// Show model directory path
    Path,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelGroup {
    /// WD14 taggers (configured repos plus the stacked trio)
    Tagger,
    /// BLIP weights and tokenizer
    Blip,
    /// Local summarization model and tokenizer
    Llm,
    All,
}

/// One downloadable file.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelFile {
    pub group: ModelGroup,
    pub repo: String,
    pub revision: String,
    pub file: String,
}

impl ModelFile {
    fn new(group: ModelGroup, repo: &str, revision: &str, file: &str) -> Self {
        Self {
            group,
            repo: repo.to_string(),
            revision: revision.to_string(),
            file: file.to_string(),
        }
    }
}

/// Every file the configured drivers may need, in display order.
pub fn known_files(config: &Config) -> Vec<ModelFile> {
    let mut files = Vec::new();

    let mut tagger_repos: Vec<String> = config.tagger.repos.clone();
    for repo in STACKED_TAGGER_REPOS {
        if !tagger_repos.iter().any(|r| r == repo) {
            tagger_repos.push(repo.to_string());
        }
    }
    for repo in &tagger_repos {
        for file in [MODEL_FILENAME, TAGS_FILENAME] {
            files.push(ModelFile::new(ModelGroup::Tagger, repo, MAIN_REVISION, file));
        }
    }

    let b = &config.blip;
    let (weights_repo, weights_revision, weights_file) = if b.quantized {
        (&b.quantized_repo, MAIN_REVISION, b.quantized_file.as_str())
    } else {
        (&b.model_repo, b.revision.as_str(), blip::WEIGHTS_FILE)
    };
    files.push(ModelFile::new(ModelGroup::Blip, weights_repo, weights_revision, weights_file));
    files.push(ModelFile::new(
        ModelGroup::Blip,
        &b.model_repo,
        MAIN_REVISION,
        blip::TOKENIZER_FILE,
    ));

    let l = &config.summarize.local;
    files.push(ModelFile::new(ModelGroup::Llm, &l.repo, MAIN_REVISION, &l.filename));
    files.push(ModelFile::new(
        ModelGroup::Llm,
        &l.tokenizer_repo,
        MAIN_REVISION,
        local::TOKENIZER_FILE,
    ));

    files
}

fn selected(files: Vec<ModelFile>, group: ModelGroup) -> Vec<ModelFile> {
    files
        .into_iter()
        .filter(|f| group == ModelGroup::All || f.group == group)
        .collect()
}

/// Execute the models command.
pub async fn execute(args: ModelsArgs, config: Config) -> anyhow::Result<()> {
    let hub = ModelHub::new(config.model_dir());

    match args.command {
        ModelsCommand::Download { group } => {
            let files = selected(known_files(&config), group);
            for f in &files {
                hub.fetch(&f.repo, &f.revision, &f.file).await?;
            }
            println!("{} model file(s) ready in {}", files.len(), hub.root().display());
        }

        ModelsCommand::List => {
            println!("Models in {}:", hub.root().display());
            for f in known_files(&config) {
                let status = if hub.is_cached(&f.repo, &f.file) {
                    "installed"
                } else {
                    "missing"
                };
                let group = format!("{:?}", f.group).to_lowercase();
                println!("  {:<7} {:<10} {}/{}", group, status, f.repo, f.file);
            }
        }

        ModelsCommand::Path => {
            println!("{}", hub.root().display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_files_cover_every_group() {
        let files = known_files(&Config::default());
        // one configured tagger repo is part of the stacked trio
        assert_eq!(selected(files.clone(), ModelGroup::Tagger).len(), 6);
        assert_eq!(selected(files.clone(), ModelGroup::Blip).len(), 2);
        assert_eq!(selected(files.clone(), ModelGroup::Llm).len(), 2);
        assert_eq!(selected(files, ModelGroup::All).len(), 10);
    }

    #[test]
    fn blip_weights_follow_quantized_flag() {
        let mut config = Config::default();
        config.blip.quantized = true;
        let files = selected(known_files(&config), ModelGroup::Blip);
        assert_eq!(files[0].repo, config.blip.quantized_repo);
        assert_eq!(files[0].file, config.blip.quantized_file);
        assert_eq!(files[1].file, "tokenizer.json");
    }

    #[test]
    fn full_blip_weights_use_configured_revision() {
        let config = Config::default();
        let files = selected(known_files(&config), ModelGroup::Blip);
        assert_eq!(files[0].revision, "refs/pr/18");
    }

    #[tokio::test]
    async fn list_and_path_do_not_download() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.general.model_dir = dir.path().to_path_buf();

        for command in [ModelsCommand::List, ModelsCommand::Path] {
            execute(ModelsArgs { command }, config.clone()).await.unwrap();
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
