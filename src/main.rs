use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use shiru::api::{ApiClient, WordDraft, WordPatch};
use shiru::config::Config;
use shiru::credential::{CredentialCache, FileLegacyToken};
use shiru::network::NetworkMonitor;
use shiru::resource::from_inline;
use shiru::session::SessionBus;
use shiru::store::{Collection, MemoryStorage, SqliteStorage, Storage};
use shiru::sync::{Source, Synced};
use shiru::{Error, OfflineClient};

#[derive(Parser, Debug)]
#[command(name = "shiru")]
#[command(about = "Offline-first client for the Shiru vocabulary service")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/shiru/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Treat the network as unreachable; only local data is used
  #[arg(long, global = true)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show connectivity, session and sync state
  Status,
  /// Sign in with an identity-provider id token
  Login { id_token: String },
  /// Sign out and forget the session token
  Logout,
  /// Saved words
  #[command(subcommand)]
  Words(WordsCommand),
  /// Analyzed images
  #[command(subcommand)]
  History(HistoryCommand),
  /// Synthesize speech (cached after the first request)
  Speak {
    text: String,
    /// Write the audio to this file
    #[arg(short, long)]
    out: Option<PathBuf>,
  },
  /// Show what is stored for offline use
  Offline,
}

#[derive(Subcommand, Debug)]
enum WordsCommand {
  List,
  Show { id: String },
  Add { word: String, kana: String, meaning: String },
  /// Look a word up in the dictionary, optionally saving it
  Lookup {
    word: String,
    #[arg(long)]
    save: bool,
  },
  Update {
    id: String,
    #[arg(long)]
    word: Option<String>,
    #[arg(long)]
    kana: Option<String>,
    #[arg(long)]
    meaning: Option<String>,
  },
  Rm { id: String },
}

#[derive(Subcommand, Debug)]
enum HistoryCommand {
  List,
  Show { id: String },
  /// Upload an image for analysis
  Analyze { image: PathBuf },
  Rm { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = init_logging()?;

  if config.storage.ephemeral {
    run(Arc::new(MemoryStorage::new()), &config, args).await
  } else {
    let storage = match &config.storage.path {
      Some(path) => SqliteStorage::open_at(path)?,
      None => SqliteStorage::open()?,
    };
    run(Arc::new(storage), &config, args).await
  }
}

/// Log to a file in the data directory; stdout belongs to command output.
fn init_logging() -> Result<WorkerGuard> {
  let log_dir = Config::data_dir()?;
  std::fs::create_dir_all(&log_dir)?;

  let appender = tracing_appender::rolling::never(&log_dir, "shiru.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  let filter = EnvFilter::try_from_env("SHIRU_LOG").unwrap_or_else(|_| EnvFilter::new("shiru=info"));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}

async fn run<S: Storage + 'static>(storage: Arc<S>, config: &Config, args: Args) -> Result<()> {
  let bus = SessionBus::new();
  let legacy = Arc::new(FileLegacyToken::new(config.legacy_token_path()?));
  let credentials =
    Arc::new(CredentialCache::new(Arc::clone(&storage), bus.clone()).with_legacy(legacy));
  let api = Arc::new(ApiClient::new(&config.api, Arc::clone(&credentials))?);

  let network = if args.offline {
    NetworkMonitor::new(false)
  } else {
    NetworkMonitor::from_probe(api.as_ref()).await
  };
  network.subscribe(|transition| {
    if transition.came_online() {
      info!("back online");
    }
  });

  let client = OfflineClient::new(Arc::clone(&storage), network, bus, credentials, api);
  let result = dispatch(&client, storage.as_ref(), args.command).await;
  client.flush().await;

  result.map_err(|report| match report.downcast_ref::<Error>() {
    Some(Error::AuthExpired) => eyre!("session expired, run `shiru login` again"),
    _ => report,
  })
}

async fn dispatch<S: Storage + 'static>(
  client: &OfflineClient<S>,
  storage: &S,
  command: Command,
) -> Result<()> {
  match command {
    Command::Status => {
      let profile = client.restore_session().await?;
      let reachable = client.network().is_reachable();
      println!("network:     {}", if reachable { "online" } else { "offline" });
      match profile {
        Some(profile) => println!("signed in:   {} <{}>", profile.name, profile.email),
        None => println!("signed in:   no"),
      }
      match client.last_synced()? {
        Some(at) => println!("last synced: {}", at.to_rfc3339()),
        None => println!("last synced: never"),
      }
    }

    Command::Login { id_token } => {
      let profile = client.login(&id_token).await?;
      println!("Signed in as {} <{}>", profile.name, profile.email);
    }

    Command::Logout => {
      client.logout()?;
      println!("Signed out");
    }

    Command::Words(command) => words(client, command).await?,
    Command::History(command) => history(client, command).await?,

    Command::Speak { text, out } => {
      let payload = client.speak(&text).await?;
      match out {
        Some(path) => write_inline(&payload, &path)?,
        None => println!("{} bytes of audio cached", payload.len()),
      }
    }

    Command::Offline => {
      for collection in Collection::ALL {
        println!("{:<16} {}", collection.as_str(), storage.count(collection)?);
      }
      if let Some(profile) = client.profile() {
        println!("credential for {} is valid", profile.email);
      }
    }
  }

  Ok(())
}

async fn words<S: Storage + 'static>(
  client: &OfflineClient<S>,
  command: WordsCommand,
) -> Result<()> {
  let wordbook = client.wordbook();
  match command {
    WordsCommand::List => {
      let words = wordbook.list().await?;
      report_source(&words);
      for word in &words.data {
        println!("{:<38} {}【{}】 {}", word.id, word.word, word.reading, word.meaning);
      }
    }
    WordsCommand::Show { id } => {
      let word = wordbook.get(&id).await?;
      report_source(&word);
      let word = word.data;
      println!("{}【{}】", word.word, word.reading);
      println!("{}", word.meaning);
      if let Some(at) = word.timestamp {
        println!("added {}", at.format("%Y-%m-%d %H:%M"));
      }
    }
    WordsCommand::Add {
      word,
      kana,
      meaning,
    } => {
      let word = wordbook.add(WordDraft { word, kana, meaning }).await?;
      println!("Added {} ({})", word.word, word.id);
    }
    WordsCommand::Lookup { word, save } => {
      let translation = wordbook.lookup(&word).await?;
      println!("{}【{}】 {}", translation.word, translation.kana, translation.meaning);
      if let Some(example) = &translation.example {
        println!("  {}", example);
      }
      if let Some(example_meaning) = &translation.example_meaning {
        println!("  {}", example_meaning);
      }
      if save {
        let saved = wordbook.add(translation.into_draft()).await?;
        println!("Added {} ({})", saved.word, saved.id);
      }
    }
    WordsCommand::Update {
      id,
      word,
      kana,
      meaning,
    } => {
      let patch = WordPatch {
        word,
        kana,
        meaning,
      };
      match wordbook.update(&id, patch).await? {
        Some(word) => println!("Updated {}【{}】 {}", word.word, word.reading, word.meaning),
        None => println!("Updated {}", id),
      }
    }
    WordsCommand::Rm { id } => {
      let outcome = wordbook.remove(&id).await?;
      println!("{}: {}", id, outcome);
    }
  }
  Ok(())
}

async fn history<S: Storage + 'static>(
  client: &OfflineClient<S>,
  command: HistoryCommand,
) -> Result<()> {
  let book = client.history();
  match command {
    HistoryCommand::List => {
      let items = book.list().await?;
      report_source(&items);
      for item in &items.data {
        let when = item
          .timestamp
          .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
          .unwrap_or_default();
        println!("{:<38} {:<16} {}", item.id, when, item.sentence);
      }
    }
    HistoryCommand::Show { id } => {
      let item = book.get(&id).await?;
      report_source(&item);
      let item = item.data;
      println!("{}", item.sentence);
      println!("{}", item.translated_sentence);
      for word in &item.words {
        println!("  {}【{}】 {}", word.word, word.reading, word.meaning);
      }
      if let Some(url) = item.image_url.as_deref() {
        match client.image(url).await {
          Ok(_) => println!("image available offline"),
          Err(e) => warn!("image not cached: {}", e),
        }
      }
    }
    HistoryCommand::Analyze { image } => {
      let bytes = std::fs::read(&image)
        .map_err(|e| eyre!("Failed to read image {}: {}", image.display(), e))?;
      let filename = image
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("image.jpg");
      let item = book.analyze(bytes, filename).await?;
      println!("{}", item.sentence);
      println!("{}", item.translated_sentence);
      println!("{} words, saved as {}", item.word_count, item.id);
    }
    HistoryCommand::Rm { id } => {
      let outcome = book.remove(&id).await?;
      println!("{}: {}", id, outcome);
    }
  }
  Ok(())
}

fn report_source<T>(result: &Synced<T>) {
  match (result.source, result.warning.as_deref()) {
    (Source::Remote, _) => {}
    (Source::Mirror, _) => eprintln!("offline: showing local copy"),
    (Source::Fallback, Some(warning)) => eprintln!("server unavailable ({}), showing local copy", warning),
    (Source::Fallback, None) => eprintln!("server unavailable, showing local copy"),
  }
}

fn write_inline(payload: &str, path: &Path) -> Result<()> {
  let fetched = from_inline(payload).ok_or_else(|| eyre!("cached audio is not a data URL"))?;
  std::fs::write(path, &fetched.bytes)?;
  println!("Wrote {} ({} bytes)", path.display(), fetched.bytes.len());
  Ok(())
}
