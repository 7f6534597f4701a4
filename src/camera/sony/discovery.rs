use crate::config::SonyConfig;
use crate::error::CameraError;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Progress of the SSDP search for a camera
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    Idle,
    Searching,
    Found,
    Connected,
}

/// Repeating SSDP M-SEARCH for one search target
#[derive(Debug, Clone)]
pub struct SsdpSearch {
    search_target: String,
    target: String,
    interval: Duration,
    state: Arc<Mutex<DiscoveryState>>,
}

enum Step {
    Aborted,
    Tick,
    Response(Vec<u8>, SocketAddr),
    ReceiveFailed(std::io::Error),
}

impl SsdpSearch {
    pub fn from_config(config: &SonyConfig) -> Self {
        Self {
            search_target: config.search_target.clone(),
            target: config.ssdp_address.clone(),
            interval: config.discovery_interval(),
            state: Arc::new(Mutex::new(DiscoveryState::Idle)),
        }
    }

    pub fn state(&self) -> DiscoveryState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: DiscoveryState) {
        *self.state.lock() = state;
    }

    /// M-SEARCH request datagram
    pub fn request(&self) -> String {
        format!(
            "M-SEARCH * HTTP/1.1\r\n\
             HOST: {}\r\n\
             MAN: \"ssdp:discover\"\r\n\
             MX: 1\r\n\
             ST: {}\r\n\
             USER-AGENT: fotobox/{}\r\n\r\n",
            self.target,
            self.search_target,
            env!("CARGO_PKG_VERSION")
        )
    }

    /// Search every interval until a camera answers or `abort` is cancelled.
    /// Returns the description location of the first matching response.
    pub async fn find_camera(&self, abort: &CancellationToken) -> Result<String, CameraError> {
        info!("Start searching for camera");
        self.set_state(DiscoveryState::Searching);

        let target: SocketAddr =
            tokio::net::lookup_host(&self.target)
                .await?
                .next()
                .ok_or_else(|| CameraError::DiscoveryFailed {
                    details: format!("cannot resolve SSDP address '{}'", self.target),
                })?;

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut socket: Option<UdpSocket> = None;
        let mut buf = vec![0u8; 2048];

        loop {
            let step = tokio::select! {
                biased;
                _ = abort.cancelled() => Step::Aborted,
                _ = ticker.tick() => Step::Tick,
                received = recv_from(socket.as_ref(), &mut buf) => match received {
                    Ok((len, from)) => Step::Response(buf[..len].to_vec(), from),
                    Err(e) => Step::ReceiveFailed(e),
                },
            };

            match step {
                Step::Aborted => {
                    info!("Abort searching for camera");
                    self.set_state(DiscoveryState::Idle);
                    return Err(CameraError::InitAborted);
                }
                Step::Tick => {
                    // fresh listener per round, like restarting the client
                    debug!("Call SSDP search");
                    socket = None;
                    match self.send_search(target).await {
                        Ok(fresh) => socket = Some(fresh),
                        Err(e) => warn!("SSDP search failed: {}", e),
                    }
                }
                Step::Response(datagram, from) => {
                    if let Some(location) = parse_search_response(&datagram, &self.search_target) {
                        info!("Found a camera at {}: {}", from, location);
                        self.set_state(DiscoveryState::Found);
                        return Ok(location);
                    }
                    debug!("Ignoring SSDP response from {}", from);
                }
                Step::ReceiveFailed(e) => {
                    warn!("SSDP receive failed: {}", e);
                    socket = None;
                }
            }
        }
    }

    async fn send_search(&self, target: SocketAddr) -> std::io::Result<UdpSocket> {
        let bind: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        if target.ip().is_multicast() {
            socket.set_multicast_ttl_v4(2)?;
        }
        socket.send_to(self.request().as_bytes(), target).await?;
        Ok(socket)
    }
}

/// Receive on the current socket, pending forever while there is none
async fn recv_from(
    socket: Option<&UdpSocket>,
    buf: &mut [u8],
) -> std::io::Result<(usize, SocketAddr)> {
    match socket {
        Some(socket) => socket.recv_from(buf).await,
        None => std::future::pending().await,
    }
}

/// LOCATION header of an SSDP response whose ST matches `search_target`
pub fn parse_search_response(datagram: &[u8], search_target: &str) -> Option<String> {
    let text = std::str::from_utf8(datagram).ok()?;
    let mut lines = text.lines();

    let status = lines.next()?.trim();
    if !status.starts_with("HTTP/1.1 200") && !status.starts_with("NOTIFY") {
        return None;
    }

    let mut location = None;
    let mut search_target_matches = false;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match name.trim().to_ascii_uppercase().as_str() {
            "LOCATION" => location = Some(value.to_string()),
            "ST" | "NT" => search_target_matches = value == search_target,
            _ => {}
        }
    }

    if search_target_matches {
        location.filter(|l| !l.is_empty())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ST: &str = "urn:schemas-sony-com:service:ScalarWebAPI:1";

    fn search_response(location: &str, st: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\n\
             CACHE-CONTROL: max-age=1800\r\n\
             EXT:\r\n\
             LOCATION: {}\r\n\
             SERVER: UPnP/1.0 SonyImagingDevice/1.0\r\n\
             ST: {}\r\n\
             USN: uuid:00000000-0005-0010-8000-10a5d0000000::{}\r\n\r\n",
            location, st, st
        )
    }

    fn loopback_config(port: u16) -> SonyConfig {
        SonyConfig {
            ssdp_address: format!("127.0.0.1:{}", port),
            discovery_interval_ms: 100,
            ..SonyConfig::default()
        }
    }

    #[test]
    fn test_parse_search_response() {
        let response = search_response("http://192.168.122.1:61000/scalarwebapi_dd.xml", ST);
        assert_eq!(
            parse_search_response(response.as_bytes(), ST).as_deref(),
            Some("http://192.168.122.1:61000/scalarwebapi_dd.xml")
        );

        let other = search_response("http://10.0.0.2/desc.xml", "upnp:rootdevice");
        assert!(parse_search_response(other.as_bytes(), ST).is_none());
        assert!(parse_search_response(b"\xff\xfe garbage", ST).is_none());
        assert!(parse_search_response(b"M-SEARCH * HTTP/1.1\r\n\r\n", ST).is_none());
    }

    #[test]
    fn test_request_format() {
        let search = SsdpSearch::from_config(&SonyConfig::default());
        let request = search.request();
        assert!(request.starts_with("M-SEARCH * HTTP/1.1\r\n"));
        assert!(request.contains("HOST: 239.255.255.250:1900\r\n"));
        assert!(request.contains("MAN: \"ssdp:discover\"\r\n"));
        assert!(request.contains(&format!("ST: {}\r\n", ST)));
        assert!(request.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_find_camera_via_responder() {
        let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = responder.local_addr().unwrap().port();

        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            // ignore the first search to exercise the retry
            let _ = responder.recv_from(&mut buf).await.unwrap();
            let (len, from) = responder.recv_from(&mut buf).await.unwrap();
            assert!(String::from_utf8_lossy(&buf[..len]).contains(ST));

            let response = search_response("http://127.0.0.1:9/dd.xml", ST);
            responder.send_to(response.as_bytes(), from).await.unwrap();
            // duplicate answers after resolution are ignored
            let _ = responder.send_to(response.as_bytes(), from).await;
        });

        let search = SsdpSearch::from_config(&loopback_config(port));
        let location = tokio::time::timeout(
            Duration::from_secs(5),
            search.find_camera(&CancellationToken::new()),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(location, "http://127.0.0.1:9/dd.xml");
        assert_eq!(search.state(), DiscoveryState::Found);
    }

    #[tokio::test]
    async fn test_abort_stops_searching() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = silent.local_addr().unwrap().port();

        let search = SsdpSearch::from_config(&loopback_config(port));
        let abort = CancellationToken::new();

        let task = {
            let search = search.clone();
            let abort = abort.clone();
            tokio::spawn(async move { search.find_camera(&abort).await })
        };

        tokio::time::sleep(Duration::from_millis(250)).await;
        abort.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(CameraError::InitAborted)));
        assert_eq!(search.state(), DiscoveryState::Idle);

        // no further searches after the abort
        let mut buf = [0u8; 1024];
        let mut searches = 0;
        while let Ok(Ok(_)) =
            tokio::time::timeout(Duration::from_millis(50), silent.recv_from(&mut buf)).await
        {
            searches += 1;
        }
        assert!(searches >= 1);
        assert!(
            tokio::time::timeout(Duration::from_millis(300), silent.recv_from(&mut buf))
                .await
                .is_err()
        );
    }
}
