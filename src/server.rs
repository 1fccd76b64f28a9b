use std::net::{TcpListener, TcpStream, ToSocketAddrs};

use serde_json::Value;
use tracing::{debug, error, info};

use crate::command::Envelope;
use crate::protocol::Framed;
use crate::thread_pool::ThreadPool;
use crate::{Result, StoreEngine};

/// default TCP port of the nframe server
pub const DEFAULT_PORT: u16 = 7645;

/// A TCP socket server implementation over an nframe storage engine.
/// It listens for incoming connections on a [`SocketAddr`](std::net::SocketAddr) and serves
/// each connection as a job on its [`ThreadPool`].
///
/// Every connection carries exactly one exchange: the client sends an [`Envelope`] and the
/// server sends back a response, both using the [framing protocol](crate::protocol).
///
/// Requests do not take the store's [`PidLock`](crate::PidLock). Each one runs in its own
/// store session, so two requests that overlap can lose one of their updates.
///
/// # Example
/// Create and run a new server listening on "127.0.0.1:7645", starting a thread for every
/// connection and keeping its data in "data.json"
/// ```rust
/// use std::net::SocketAddr;
/// use nframe::{JsonStore, NframeServer};
/// use nframe::thread_pool::{NaiveThreadPool, ThreadPool};
/// # use std::error::Error;
/// # fn main() -> Result<(), Box<dyn Error>> {
/// let addr: SocketAddr = "127.0.0.1:7645".parse()?;
/// let pool = NaiveThreadPool::new(0)?;
/// let store = JsonStore::new("data.json");
/// let server = NframeServer::new(store, pool);
/// //server.run(addr)?;
/// #
/// # Ok(())
/// # }
/// ```
pub struct NframeServer<E: StoreEngine, P: ThreadPool> {
    /// the storage engine requests are served from
    engine: E,
    /// the pool that runs one job per connection
    pool: P,
}

impl<E: StoreEngine, P: ThreadPool> NframeServer<E, P> {
    /// Create a new `NframeServer` using the given [`StoreEngine`] and [`ThreadPool`]
    /// implementation.
    pub fn new(engine: E, pool: P) -> Self {
        NframeServer { engine, pool }
    }

    /// binds to the given address and serves connections until accepting fails for good.
    ///
    /// # Errors
    /// returns [`NframeError::Io`](crate::NframeError::Io) if the address could not be bound
    pub fn run<A: ToSocketAddrs>(self, addr: A) -> Result<()> {
        let listener = TcpListener::bind(addr)?;
        self.run_on(listener)
    }

    /// serves connections accepted by an already bound `listener`.
    ///
    /// A connection that fails, for example with a protocol error, is logged and closed. The
    /// listener and all other connections carry on.
    pub fn run_on(self, listener: TcpListener) -> Result<()> {
        info!("listening on {}", listener.local_addr()?);
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let engine = self.engine.clone();
                    self.pool.spawn(move || {
                        if let Err(e) = serve(engine, stream) {
                            error!("Error on serving client: {}", e);
                        }
                    });
                }
                Err(e) => error!("Connection failed: {}", e),
            }
        }
        Ok(())
    }
}

/// Serves the single exchange carried by the `tcp` connection: receive an [`Envelope`],
/// dispatch it against the engine, send the response.
fn serve<E: StoreEngine>(engine: E, tcp: TcpStream) -> Result<()> {
    let peer_addr = tcp.peer_addr()?;
    let mut framed = Framed::new(&tcp);

    let envelope: Envelope = framed.receive()?;
    debug!("Receive request from {}: {:?}", peer_addr, envelope);

    let response = dispatch(&engine, envelope)?;
    framed.send(&response)?;
    debug!("Response sent to {}", peer_addr);
    Ok(())
}

/// Executes `envelope` in a single session of `engine` and returns the response.
///
/// A [`GET_DATA`](crate::GET_DATA) request is answered with the whole mapping. Any other
/// command merges the envelope's data into the mapping and is answered with the envelope
/// itself.
pub fn dispatch<E: StoreEngine>(engine: &E, envelope: Envelope) -> Result<Value> {
    let mut session = engine.begin()?;
    let response = if envelope.is_get_data() {
        Value::Object(session.data().clone())
    } else {
        if let Some(data) = &envelope.data {
            session.data_mut().extend(data.clone());
        }
        serde_json::to_value(&envelope)?
    };
    session.commit()?;
    Ok(response)
}
