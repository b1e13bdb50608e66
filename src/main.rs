use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gluttony::config::{Config, Overrides, Transport};
use gluttony::error::GluttonyError;
use gluttony::geojson::GeoJsonBackend;
use gluttony::map::{status_label, MapEvent, MapView};
use gluttony::places::{FileFetcher, HttpFetcher, PlaceStore, SourceFetcher};
use gluttony::recommend::{preprocess_places, recommend};
use gluttony::store::{SqliteKeyValue, StatusStore};
use gluttony::types::{Place, Status};

/// Roughly the middle of Taiwan.
const DEFAULT_CENTER: (f64, f64) = (23.7, 121.0);
const DEFAULT_ZOOM: u8 = 8;

#[derive(Parser)]
#[command(name = "gluttony")]
#[command(version)]
#[command(about = "A command line place directory with visit tracking", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
    #[arg(short, long, global = true, env = "GLUTTONY_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long, global = true, env = "GLUTTONY_DB")]
    db: Option<PathBuf>,
    #[arg(long, global = true, env = "GLUTTONY_BASE_URL")]
    base_url: Option<String>,
    #[arg(long, global = true, env = "GLUTTONY_DATA_DIR")]
    data_dir: Option<PathBuf>,
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// List every place from all lists
    Places,
    /// Suggest up to ten places you have not visited
    Recommend,
    /// Mark a place as visited
    Visit { id: String },
    /// Remove a place from the visited list
    Unvisit { id: String },
    /// Show or set the status of a place
    Status { id: String, status: Option<Status> },
    /// Toggle a place as favorite
    Favorite { id: String },
    /// List favorite place ids
    Favorites,
    /// Show or set your display name
    Name { name: Option<String> },
    /// Forget every visit. Favorites and the name are kept.
    Reset,
    /// Render the place markers to a GeoJSON file
    Map {
        output: PathBuf,
        /// Your position as `lat,lng`
        #[arg(long, value_parser = parse_position)]
        here: Option<(f64, f64)>,
    },
}

fn parse_position(s: &str) -> Result<(f64, f64), String> {
    let (lat, lng) = s
        .split_once(',')
        .ok_or_else(|| "expected lat,lng".to_string())?;
    let lat = lat.trim().parse().map_err(|_| format!("bad latitude '{lat}'"))?;
    let lng = lng.trim().parse().map_err(|_| format!("bad longitude '{lng}'"))?;
    Ok((lat, lng))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_filter = if cli.verbose {
        "gluttony=debug"
    } else {
        "gluttony=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let mut message = e.to_string();
            let mut cause = std::error::Error::source(&e);
            while let Some(inner) = cause {
                message.push_str(&format!(": {inner}"));
                cause = inner.source();
            }
            error!("{message}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), GluttonyError> {
    let config = Config::load(&Overrides {
        config_path: cli.config,
        base_url: cli.base_url,
        data_dir: cli.data_dir,
        db_path: cli.db,
    })?;
    let store = StatusStore::new(SqliteKeyValue::new(&config.db_path.to_string_lossy())?);
    store.init_user_name()?;

    match cli.command {
        Command::Places => {
            let places = load_places(&config).await?;
            let favorites: HashSet<String> = store.favorites().into_iter().collect();
            for place in &places {
                let favorite = if favorites.contains(place.id()) { "★" } else { " " };
                println!(
                    "{} {} {} [{}] {} ({})",
                    favorite,
                    status_label(store.get_status(place.id())),
                    place.name,
                    place.category.as_deref().unwrap_or("-"),
                    place.id(),
                    place.source.as_deref().unwrap_or("")
                );
            }
        }
        Command::Recommend => {
            let places = load_places(&config).await?;
            let visited: HashSet<String> = store.list_visited().into_iter().collect();
            let processed = preprocess_places(&places);
            let picks = recommend(&processed, &visited, &mut rand::thread_rng());
            if picks.is_empty() {
                println!("{}, you have been everywhere!", store.user_name());
            }
            for pick in picks {
                let place = &pick.place.place;
                println!(
                    "{} [{}] {}",
                    place.name,
                    place.category.as_deref().unwrap_or("-"),
                    place.url.as_deref().unwrap_or("")
                );
            }
        }
        Command::Visit { id } => {
            store.set_status(&id, Status::Visited)?;
            info!(%id, "marked visited");
        }
        Command::Unvisit { id } => {
            store.remove_visited(&id)?;
            info!(%id, "removed from visited");
        }
        Command::Status { id, status } => {
            if let Some(status) = status {
                store.set_status(&id, status)?;
            }
            println!("{id}: {}", store.get_status(&id));
        }
        Command::Favorite { id } => {
            let now_favorite = store.toggle_favorite(&id)?.contains(&id);
            println!("{id}: {}", if now_favorite { "★ favorite" } else { "not favorite" });
        }
        Command::Favorites => {
            for id in store.favorites() {
                println!("{id}");
            }
        }
        Command::Name { name } => {
            if let Some(name) = name {
                store.set_user_name(&name)?;
            }
            println!("{}", store.user_name());
        }
        Command::Reset => {
            store.reset_visited()?;
            info!("visited list cleared");
        }
        Command::Map { output, here } => {
            let places = load_places(&config).await?;
            let statuses = store.status_map(places.iter().map(Place::id));

            let mut view = MapView::new(GeoJsonBackend::new());
            view.init(DEFAULT_CENTER, DEFAULT_ZOOM);
            let points: Vec<(f64, f64)> = places.iter().filter_map(Place::coordinates).collect();
            view.on_move_end(move |bounds| {
                let visible = points
                    .iter()
                    .filter(|(lat, lng)| bounds.contains(*lat, *lng))
                    .count();
                info!(visible, "viewport updated");
            });
            let changes = view.update_markers(&places, &statuses);
            if let Some((lat, lng)) = here {
                view.add_current_location(lat, lng);
            }
            view.fit_places(&places);
            view.handle_event(MapEvent::MoveEnd);

            let rendered = serde_json::to_string_pretty(&view.backend().to_geojson())?;
            std::fs::write(&output, rendered).map_err(|source| GluttonyError::Output {
                path: output.display().to_string(),
                source,
            })?;
            info!(
                markers = changes.added,
                path = %output.display(),
                "wrote map"
            );
        }
    }
    Ok(())
}

async fn load_places(config: &Config) -> Result<Vec<Place>, GluttonyError> {
    let fetcher = match &config.transport {
        Transport::Http { base_url } => {
            SourceFetcher::Http(HttpFetcher::new(base_url, config.timeout)?)
        }
        Transport::Files { data_dir } => SourceFetcher::File(FileFetcher::new(data_dir)),
    };
    let places = PlaceStore::new(fetcher, config.sources.clone())
        .load()
        .await?;
    Ok(places)
}
