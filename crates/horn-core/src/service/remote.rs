use std::time::Duration;

use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};

use crate::model::ConnectionMeta;

pub const CLIENT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(10);

pub fn context_interceptor<T>(mut request: Request<T>) -> Result<Request<T>, Status> {
    let (remote_ip, remote_port) = match request.remote_addr() {
        Some(addr) => (addr.ip().to_string(), addr.port()),
        None => ("unknown".to_string(), 0),
    };

    let now = chrono::Utc::now().timestamp_millis();
    let meta = ConnectionMeta {
        remote_addr: match remote_port {
            0 => remote_ip.clone(),
            port => format!("{}:{}", remote_ip, port),
        },
        connection_id: format!("{}_{}_{}", now, remote_ip, remote_port),
    };

    request.extensions_mut().insert(meta);

    Ok(request)
}

/// Client-side channel to a gRPC target, e.g. `http://127.0.0.1:9090`
///
/// Sends HTTP/2 keep-alive pings every 30 s, even while idle. The channel
/// connects on first use and is cheap to clone.
#[derive(Clone)]
pub struct ChannelManager {
    channel: Channel,
}

impl ChannelManager {
    pub fn new(target: &str) -> Result<Self, tonic::transport::Error> {
        let channel = Endpoint::from_shared(target.to_string())?
            .http2_keep_alive_interval(CLIENT_KEEP_ALIVE_INTERVAL)
            .keep_alive_timeout(CLIENT_KEEP_ALIVE_TIMEOUT)
            .keep_alive_while_idle(true)
            .connect_lazy();

        Ok(Self { channel })
    }

    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }
}
