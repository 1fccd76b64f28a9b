use std::fs;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;

use crossbeam_utils::thread as scoped;
use nframe::{
    dispatch, Envelope, JsonStore, NaiveThreadPool, NframeClient, NframeServer, Reply,
    StoreData, StoreEngine, ThreadPool, GET_DATA,
};
use serde_json::{json, Value};
use tempfile::TempDir;

const MAX_RUNS: usize = 50;

fn data(value: Value) -> StoreData {
    match value {
        Value::Object(map) => map,
        other => panic!("{} is not an object", other),
    }
}

/// starts a server on a free local port, storing its data in `data_file`
fn start_server<P: ThreadPool + Send + 'static>(data_file: &Path, pool: P) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = NframeServer::new(JsonStore::new(data_file), pool);
    thread::spawn(move || server.run_on(listener));
    addr
}

fn start_naive_server(data_file: &Path) -> SocketAddr {
    start_server(data_file, NaiveThreadPool::new(0).unwrap())
}

#[test]
fn add_data_is_echoed_and_stored() {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let data_file = temp_dir.path().join("data.json");
    let client = NframeClient::new(start_naive_server(&data_file)).unwrap();

    let reply = client.message(data(json!({"x": 1})));
    assert_eq!(reply, Reply::Ok(json!({"command": "add data", "data": {"x": 1}})));

    let all = client.get_data().ok().unwrap();
    assert_eq!(all["x"], json!(1));

    // and on disk
    assert_eq!(JsonStore::new(&data_file).load().unwrap()["x"], json!(1));
}

#[test]
fn get_data_sees_preexisting_data() {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let data_file = temp_dir.path().join("data.json");
    JsonStore::new(&data_file)
        .add_data(data(json!({"test_data": ["test data 1", "test data 2"]})))
        .unwrap();

    let client = NframeClient::new(start_naive_server(&data_file)).unwrap();
    let all = client.get_data().ok().unwrap();
    assert_eq!(all, json!({"test_data": ["test data 1", "test data 2"]}));
}

#[test]
fn any_other_command_is_an_upsert() {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let client = NframeClient::new(start_naive_server(&temp_dir.path().join("data.json"))).unwrap();

    let reply = client.communicate("store", Some(data(json!({"k": "v"}))));
    assert_eq!(reply, Reply::Ok(json!({"command": "store", "data": {"k": "v"}})));

    // null data merges nothing and is echoed as is
    let reply = client.communicate("ping", None);
    assert_eq!(reply, Reply::Ok(json!({"command": "ping", "data": null})));

    assert_eq!(client.get_data(), Reply::Ok(json!({"k": "v"})));
}

#[test]
fn large_values_cross_many_chunks() {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let client = NframeClient::new(start_naive_server(&temp_dir.path().join("data.json"))).unwrap();

    let big = "nframe".repeat(20_000);
    let reply = client.message(data(json!({"big": big})));
    assert!(!reply.is_failed());
    let all = client.get_data().ok().unwrap();
    assert_eq!(all["big"].as_str().unwrap().len(), big.len());
}

#[test]
fn lots_of_connections() {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let addr = start_naive_server(&temp_dir.path().join("data.json"));

    for num in 2..MAX_RUNS {
        let client = NframeClient::new(addr).unwrap();
        let reply = client.message(data(json!({ "num": num }))).ok().unwrap();
        assert_eq!(reply["data"], json!({ "num": num }));
        assert_eq!(client.get_data().ok().unwrap()["num"], json!(num));
    }
}

// Concurrent requests are all answered. Their updates race for the store file, so only
// the responses are checked here.
#[test]
fn simultaneous_connections() {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let addr = start_naive_server(&temp_dir.path().join("data.json"));

    scoped::scope(|s| {
        for t in 0..10 {
            s.spawn(move |_| {
                let client = NframeClient::new(addr).unwrap();
                for i in 0..5 {
                    let mut example = StoreData::new();
                    example.insert(format!("thread_{}", t), json!(format!("Example data {}", i)));
                    let reply = client.message(example.clone()).ok().unwrap();
                    assert_eq!(reply["command"], json!("add data"));
                    assert_eq!(reply["data"], Value::Object(example));
                }
            });
        }
    })
    .unwrap();

    assert!(!NframeClient::new(addr).unwrap().get_data().is_failed());
}

// Concurrent requests may overwrite each other's keys, but every load sees a complete
// document: no request fails, nothing is moved to a backup and older keys survive.
#[test]
fn simultaneous_connections_keep_the_store_intact() {
    const SEED_KEYS: usize = 2000;
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let data_file = temp_dir.path().join("data.json");
    let mut seed = StoreData::new();
    for i in 0..SEED_KEYS {
        seed.insert(format!("seed_{}", i), json!(i));
    }
    JsonStore::new(&data_file).add_data(seed).unwrap();
    let addr = start_naive_server(&data_file);

    scoped::scope(|s| {
        for t in 0..16 {
            s.spawn(move |_| {
                let client = NframeClient::new(addr).unwrap();
                for i in 0..20 {
                    let mut update = StoreData::new();
                    update.insert(format!("thread_{}", t), json!(i));
                    let reply = client.message(update);
                    assert!(!reply.is_failed(), "request {} of thread {} failed", i, t);
                }
            });
        }
    })
    .unwrap();

    let leftovers: Vec<_> = fs::read_dir(temp_dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .filter(|name| name != "data.json")
        .collect();
    assert!(leftovers.is_empty(), "unexpected files: {:?}", leftovers);

    let stored = JsonStore::new(&data_file).load().unwrap();
    for i in 0..SEED_KEYS {
        assert_eq!(stored[&format!("seed_{}", i)], json!(i));
    }
}

/// a store whose loads wait until every party of `loaded` has loaded
#[derive(Clone)]
struct GatedStore {
    store: JsonStore,
    loaded: Arc<Barrier>,
}

impl StoreEngine for GatedStore {
    fn load(&self) -> nframe::Result<StoreData> {
        let data = self.store.load()?;
        self.loaded.wait();
        Ok(data)
    }

    fn save(&self, data: &StoreData) -> nframe::Result<()> {
        self.store.save(data)
    }
}

// Two requests that both load before either saves: both succeed, the last save wins.
#[test]
fn overlapping_requests_lose_an_update() {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = JsonStore::new(temp_dir.path().join("data.json"));
    store.add_data(data(json!({"seed": true}))).unwrap();
    let gated = GatedStore {
        store: store.clone(),
        loaded: Arc::new(Barrier::new(2)),
    };

    let requests = vec![
        Envelope::new("add data", Some(data(json!({"a": 1})))),
        Envelope::new("add data", Some(data(json!({"b": 2})))),
    ];
    let handles: Vec<_> = requests
        .into_iter()
        .map(|envelope| {
            let gated = gated.clone();
            thread::spawn(move || {
                let expected = serde_json::to_value(&envelope).unwrap();
                let response = dispatch(&gated, envelope).unwrap();
                assert_eq!(response, expected);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stored = store.load().unwrap();
    assert_eq!(stored["seed"], json!(true));
    let kept = ["a", "b"].iter().filter(|key| stored.contains_key(**key)).count();
    assert_eq!(kept, 1, "expected exactly one update to survive: {:?}", stored);
}

#[test]
fn protocol_errors_only_end_their_connection() {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let addr = start_naive_server(&temp_dir.path().join("data.json"));

    // not a frame header
    let mut rogue = TcpStream::connect(addr).unwrap();
    rogue.write_all(b"hello").unwrap();
    let mut buf = Vec::new();
    // the server closes the connection without acknowledging
    rogue.read_to_end(&mut buf).unwrap();
    assert!(buf.is_empty());

    let client = NframeClient::new(addr).unwrap();
    assert!(!client.message(data(json!({"after": true}))).is_failed());
    assert_eq!(client.get_data(), Reply::Ok(json!({"after": true})));
}

#[test]
fn unreachable_server_is_a_failed_reply() {
    // grab a free port and release it again
    let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();

    let client = NframeClient::new(addr).unwrap();
    assert_eq!(client.get_data(), Reply::Failed);
    assert_eq!(client.message(data(json!({"x": 1}))), Reply::Failed);
}

#[test]
fn dispatch_runs_in_one_session() {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let store = JsonStore::new(temp_dir.path().join("data.json"));

    let envelope = Envelope::new("add data", Some(data(json!({"a": [1, 2]}))));
    let response = dispatch(&store, envelope.clone()).unwrap();
    assert_eq!(response, serde_json::to_value(&envelope).unwrap());

    let response = dispatch(&store, Envelope::new(GET_DATA, None)).unwrap();
    assert_eq!(response, json!({"a": [1, 2]}));
}
