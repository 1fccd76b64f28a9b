//! The nframe-client executable supports the following command line arguments:
//!
//! `nframe-client get [--addr HOST:PORT]`
//!
//!     Print the server's whole key/value mapping as JSON.
//!
//! `nframe-client add <JSON-OBJECT> [--addr HOST:PORT]`
//!
//!     Merge the key/values of JSON-OBJECT into the server's store and print the echoed request.
//!
//! --addr defaults to 127.0.0.1:7645. If the server can't be reached or the exchange fails, a
//! generic error is printed and the exit code is non-zero.
//!
//! `nframe-client -V`
//!
//!     Print the version.

use std::process::exit;

use clap::{crate_version, App, Arg, ArgMatches, SubCommand};
use nframe::{NframeClient, NframeError, Reply, Result, StoreData};
use serde_json::Value;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

const DEFAULT_ADDRESS: &str = "127.0.0.1:7645";

/// the requests the client can make
#[derive(Debug)]
enum Request {
    Get,
    Add(StoreData),
}

/// ['Opt'] holds parsed and validated options from the command line
#[derive(Debug)]
struct Opt {
    /// the server's host:port
    addr: String,
    req: Request,
    verbose: bool,
}

fn main() -> Result<()> {
    let matches = App::new("nframe-client")
        .version(crate_version!())
        .author("strohs <strohs1@gmail.com>")
        .about("talks to an nframe server")
        .subcommands(vec![
            SubCommand::with_name("get")
                .about("Print all data held by the server"),
            SubCommand::with_name("add")
                .about("Merge a JSON object into the server's data")
                .arg(Arg::with_name("JSON").required(true).index(1)),
        ])
        .arg(Arg::with_name("addr")
            .long("addr")
            .value_name("HOST:PORT")
            .help("sets the HOST:PORT of the server to connect to")
            .default_value(DEFAULT_ADDRESS))
        .arg(Arg::with_name("verbose")
            .short("v")
            .long("verbose")
            .help("log the cause of failed requests"))
        .get_matches();

    let opt = parse_options(&matches)?;

    // configure a subscriber that will log messages to STDERR
    subscriber_config(opt.verbose);

    run(opt)
}

/// runs the requested command with an [`NframeClient`] and prints the server's response
fn run(opt: Opt) -> Result<()> {
    let client = NframeClient::new(opt.addr.as_str())?;
    let reply = match opt.req {
        Request::Get => client.get_data(),
        Request::Add(data) => client.message(data),
    };

    match reply {
        Reply::Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Reply::Failed => {
            eprintln!("Error while communicating");
            exit(1);
        }
    }
}

/// parses the matches from the command line into an [`Opt`] struct
fn parse_options(matches: &ArgMatches) -> Result<Opt> {
    let addr = matches
        .value_of("addr")
        .unwrap_or(DEFAULT_ADDRESS)
        .to_string();
    let req = match matches.subcommand() {
        ("get", Some(_)) => Request::Get,
        ("add", Some(args)) => {
            let json = args.value_of("JSON").unwrap_or_default();
            match serde_json::from_str::<Value>(json)? {
                Value::Object(data) => Request::Add(data),
                _ => {
                    return Err(NframeError::Parsing(format!(
                        "{} is not a JSON object",
                        json
                    )))
                }
            }
        }
        _ => {
            return Err(NframeError::Parsing(
                "a command is required, see --help".to_string(),
            ))
        }
    };
    Ok(Opt {
        addr,
        req,
        verbose: matches.is_present("verbose"),
    })
}

/// configures a tracing subscriber that will log to STDERR
fn subscriber_config(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::ERROR };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting tracing default subscriber failed");
}
