//! this binary starts the nframe server
//! to see the list of options, type: `nframe-server --help`
//!
//! Before serving, the server can run a few administrative actions, in this order:
//!
//! - `--force-unlock` removes a lock file left behind by a crashed server
//! - `--import FILE` merges the data of an exported store document into the store
//! - `--export FILE` writes the store to FILE and exits
//!
//! `--exit` exits after those actions instead of starting the server.

use std::net::{IpAddr, SocketAddr, TcpListener};
use std::path::PathBuf;
use std::process::exit;

use clap::{crate_version, App, Arg, ArgMatches};
use nframe::{
    default_lock_path, JsonStore, NaiveThreadPool, NframeError, NframeServer, PidLock, Result,
    ThreadPool, DEFAULT_DATA_FILE, DEFAULT_PORT,
};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_IP: &str = "0.0.0.0";
// seconds to wait for the lock held by another nframe process
const LOCK_TIMEOUT: u64 = 5;

/// ['Opt'] holds parsed and validated options from the command line
#[derive(Debug)]
struct Opt {
    addr: SocketAddr,
    data_file: PathBuf,
    lock_file: PathBuf,
    import_file: Option<PathBuf>,
    export_file: Option<PathBuf>,
    force_unlock: bool,
    exit: bool,
    verbose: bool,
}

impl Opt {
    /// validates the command line `matches`
    /// returns `Ok<Opt>` if everything is valid
    /// # Errors
    /// returns [`NframeError::Parsing`] if one of the parameters is invalid
    ///
    fn build(matches: &ArgMatches) -> Result<Opt> {
        let ip = matches.value_of("ip").unwrap_or(DEFAULT_IP);
        let ip: IpAddr = ip
            .parse()
            .map_err(|_| NframeError::Parsing(format!("could not parse {} into an IP address", ip)))?;
        let port: u16 = match matches.value_of("port") {
            Some(port) => port
                .parse()
                .map_err(|_| NframeError::Parsing(format!("could not parse {} into a port", port)))?,
            None => DEFAULT_PORT,
        };

        Ok(Opt {
            addr: SocketAddr::new(ip, port),
            data_file: matches
                .value_of("data-file")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_FILE)),
            lock_file: matches
                .value_of("lock-file")
                .map(PathBuf::from)
                .unwrap_or_else(default_lock_path),
            import_file: matches.value_of("import").map(PathBuf::from),
            export_file: matches.value_of("export").map(PathBuf::from),
            force_unlock: matches.is_present("force-unlock"),
            exit: matches.is_present("exit"),
            verbose: matches.is_present("verbose"),
        })
    }
}

fn main() {
    // parse command line args
    let matches = App::new("nframe-server")
        .version(crate_version!())
        .author("strohs <strohs1@gmail.com>")
        .about("serves a JSON key-value store over the nframe protocol")
        .arg(Arg::with_name("ip")
            .short("i")
            .long("ip")
            .value_name("IP_ADDR")
            .help("IP address of server")
            .default_value(DEFAULT_IP))
        .arg(Arg::with_name("port")
            .short("p")
            .long("port")
            .value_name("PORT")
            .help("Port of server (default 7645)")
            .takes_value(true))
        .arg(Arg::with_name("data-file")
            .long("data-file")
            .value_name("FILE")
            .help("the JSON file the store is kept in")
            .default_value(DEFAULT_DATA_FILE))
        .arg(Arg::with_name("lock-file")
            .long("lock-file")
            .value_name("FILE")
            .help("the pid lock file (default: nframe.pid in the temp directory)")
            .takes_value(true))
        .arg(Arg::with_name("import")
            .long("import")
            .value_name("FILE")
            .help("Import data before starting server"))
        .arg(Arg::with_name("export")
            .long("export")
            .value_name("FILE")
            .help("Export data then exits"))
        .arg(Arg::with_name("force-unlock")
            .long("force-unlock")
            .help("Remove lock file without discretion"))
        .arg(Arg::with_name("exit")
            .long("exit")
            .help("exit after the import or unlock instead of starting the server"))
        .arg(Arg::with_name("verbose")
            .short("v")
            .long("verbose")
            .help("log debug messages"))
        .get_matches();

    let opt = match Opt::build(&matches) {
        Ok(opt) => opt,
        Err(err) => {
            eprintln!("{}", err);
            exit(1);
        }
    };

    // set up a tracing subscriber to log to STDERR
    subscriber_config(opt.verbose);

    if let Err(e) = run(opt) {
        error!("{}", e);
        eprintln!("{}", e);
        exit(1);
    }
}

fn run(opt: Opt) -> Result<()> {
    info!("nframe-server {}", env!("CARGO_PKG_VERSION"));
    let store = JsonStore::new(&opt.data_file);
    let lock = PidLock::new(&opt.lock_file).timeout(LOCK_TIMEOUT);

    if opt.force_unlock && lock.force_release()? {
        info!("removed lock file {:?}", lock.path());
    }

    if let Some(import_file) = &opt.import_file {
        let store = store.exclusive(&lock)?;
        store.import_data(import_file)?;
        store.finish()?;
    }

    if let Some(export_file) = &opt.export_file {
        let store = store.exclusive(&lock)?;
        store.export_data(export_file)?;
        store.finish()?;
        return Ok(());
    }

    if opt.exit {
        return Ok(());
    }

    let listener = TcpListener::bind(opt.addr)?;
    info!("Storage file: {:?}", opt.data_file);

    // keep other nframe processes away from the store while serving
    let serve_lock = lock.cleanup_on_term(true);
    let _guard = serve_lock.lock()?;

    // every connection gets its own thread
    NframeServer::new(store, NaiveThreadPool::new(0)?).run_on(listener)
}

/// configures a tracing subscriber that will log to STDERR
fn subscriber_config(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        // log to stderr instead of stdout
        .with_writer(std::io::stderr)
        // completes the builder.
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting tracing default subscriber failed");
}
