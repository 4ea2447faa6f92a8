use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::{BrokerError, DeviceBroker, DeviceLink};

pub const DEFAULT_BROKER_ADDR: &str = "127.0.0.1:5037";

const STATUS_OKAY: &[u8; 4] = b"OKAY";
const STATUS_FAIL: &[u8; 4] = b"FAIL";
const MAX_REQUEST_LEN: usize = 0xffff;

/// Talks to the ADB server's host request interface. Every operation opens
/// a fresh socket, so the broker itself holds no connection state.
#[derive(Debug, Clone)]
pub struct AdbServerBroker {
    addr: String,
    timeout: Duration,
}

impl AdbServerBroker {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn with_timeout<T, F>(&self, fut: F) -> Result<T, BrokerError>
    where
        F: std::future::Future<Output = Result<T, BrokerError>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| BrokerError::Timeout(self.timeout))?
    }

    /// Issue a single host request and return the length-prefixed reply.
    async fn host_query(&self, request: &str) -> Result<String, BrokerError> {
        self.with_timeout(async {
            let mut stream = TcpStream::connect(&self.addr).await?;
            send_request(&mut stream, request).await?;
            read_status(&mut stream).await?;
            read_message(&mut stream).await
        })
        .await
    }

    async fn remote_connect(&self, host: &str, port: u16) -> Result<String, BrokerError> {
        let target = format!("{host}:{port}");
        let reply = self.host_query(&format!("host:connect:{target}")).await?;
        debug!(target = %target, reply = %reply, "adb connect reply");
        // The server answers OKAY even when the device refused; the verdict is in the text.
        if reply.contains("connected to") {
            Ok(target)
        } else {
            Err(BrokerError::Refused(reply))
        }
    }

    async fn serial_number(&self, serial: &str) -> Result<String, BrokerError> {
        let reply = self
            .host_query(&format!("host-serial:{serial}:get-serialno"))
            .await?;
        Ok(reply.trim().to_string())
    }

    async fn shell(&self, serial: &str, instruction: &str) -> Result<String, BrokerError> {
        self.with_timeout(async {
            let mut stream = TcpStream::connect(&self.addr).await?;
            send_request(&mut stream, &format!("host:transport:{serial}")).await?;
            read_status(&mut stream).await?;
            send_request(&mut stream, &format!("shell:{instruction}")).await?;
            read_status(&mut stream).await?;
            let mut output = Vec::new();
            stream.read_to_end(&mut output).await?;
            Ok(String::from_utf8_lossy(&output).into_owned())
        })
        .await
    }
}

impl Default for AdbServerBroker {
    fn default() -> Self {
        Self::new(DEFAULT_BROKER_ADDR, Duration::from_secs(10))
    }
}

#[async_trait]
impl DeviceBroker for AdbServerBroker {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn DeviceLink>, BrokerError> {
        let target = self.remote_connect(host, port).await?;
        let serial = self.serial_number(&target).await?;
        if serial.is_empty() {
            return Err(BrokerError::NotConnected(target));
        }
        Ok(Box::new(AdbLink {
            broker: self.clone(),
            serial,
        }))
    }
}

struct AdbLink {
    broker: AdbServerBroker,
    serial: String,
}

#[async_trait]
impl DeviceLink for AdbLink {
    fn serial(&self) -> &str {
        &self.serial
    }

    async fn run(&self, instruction: &str) -> Result<String, BrokerError> {
        self.broker.shell(&self.serial, instruction).await
    }
}

async fn send_request(stream: &mut TcpStream, request: &str) -> Result<(), BrokerError> {
    if request.len() > MAX_REQUEST_LEN {
        return Err(BrokerError::Protocol(format!(
            "request of {} bytes exceeds frame limit",
            request.len()
        )));
    }
    let frame = format!("{:04x}{}", request.len(), request);
    stream.write_all(frame.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_status(stream: &mut TcpStream) -> Result<(), BrokerError> {
    let mut status = [0u8; 4];
    stream.read_exact(&mut status).await?;
    if &status == STATUS_OKAY {
        Ok(())
    } else if &status == STATUS_FAIL {
        let message = read_message(stream).await?;
        Err(BrokerError::Refused(message))
    } else {
        Err(BrokerError::Protocol(format!(
            "unexpected status {:?}",
            String::from_utf8_lossy(&status)
        )))
    }
}

async fn read_message(stream: &mut TcpStream) -> Result<String, BrokerError> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len_hex = std::str::from_utf8(&len_buf)
        .map_err(|err| BrokerError::Protocol(err.to_string()))?;
    let len = usize::from_str_radix(len_hex, 16)
        .map_err(|err| BrokerError::Protocol(format!("bad length {len_hex:?}: {err}")))?;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    String::from_utf8(buf).map_err(|err| BrokerError::Protocol(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// One scripted socket: each expected request is answered with the paired bytes.
    type Exchange = Vec<(&'static str, Vec<u8>)>;

    fn framed(message: &str) -> Vec<u8> {
        format!("{:04x}{}", message.len(), message).into_bytes()
    }

    fn okay_with(message: &str) -> Vec<u8> {
        let mut reply = b"OKAY".to_vec();
        reply.extend(framed(message));
        reply
    }

    async fn read_request(stream: &mut TcpStream) -> String {
        let mut len = [0u8; 4];
        stream.read_exact(&mut len).await.unwrap();
        let len = usize::from_str_radix(std::str::from_utf8(&len).unwrap(), 16).unwrap();
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).await.unwrap();
        String::from_utf8(buf).unwrap()
    }

    async fn scripted_server(script: Vec<Exchange>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            for exchange in script {
                let (mut stream, _) = listener.accept().await.unwrap();
                for (expected, reply) in exchange {
                    let request = read_request(&mut stream).await;
                    assert_eq!(request, expected);
                    seen.push(request);
                    stream.write_all(&reply).await.unwrap();
                }
            }
            seen
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn connect_confirms_serial() {
        let (addr, server) = scripted_server(vec![
            vec![(
                "host:connect:10.0.0.5:5555",
                okay_with("connected to 10.0.0.5:5555"),
            )],
            vec![(
                "host-serial:10.0.0.5:5555:get-serialno",
                okay_with("10.0.0.5:5555"),
            )],
        ])
        .await;

        let broker = AdbServerBroker::new(addr, Duration::from_secs(5));
        let link = broker.connect("10.0.0.5", 5555).await.unwrap();
        assert_eq!(link.serial(), "10.0.0.5:5555");
        assert_eq!(server.await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn connect_rejects_failed_reply() {
        let (addr, _server) = scripted_server(vec![vec![(
            "host:connect:10.0.0.5:5555",
            okay_with("failed to connect to '10.0.0.5:5555': Connection refused"),
        )]])
        .await;

        let broker = AdbServerBroker::new(addr, Duration::from_secs(5));
        let err = broker.connect("10.0.0.5", 5555).await.err().unwrap();
        assert!(matches!(err, BrokerError::Refused(msg) if msg.contains("Connection refused")));
    }

    #[tokio::test]
    async fn connect_requires_nonempty_serial() {
        let (addr, _server) = scripted_server(vec![
            vec![(
                "host:connect:10.0.0.5:5555",
                okay_with("already connected to 10.0.0.5:5555"),
            )],
            vec![("host-serial:10.0.0.5:5555:get-serialno", okay_with(""))],
        ])
        .await;

        let broker = AdbServerBroker::new(addr, Duration::from_secs(5));
        let err = broker.connect("10.0.0.5", 5555).await.err().unwrap();
        assert!(matches!(err, BrokerError::NotConnected(target) if target == "10.0.0.5:5555"));
    }

    #[tokio::test]
    async fn shell_switches_transport_and_reads_output() {
        let (addr, server) = scripted_server(vec![vec![
            ("host:transport:tv-serial", b"OKAY".to_vec()),
            ("shell:input keyevent 26", b"OKAYdone\n".to_vec()),
        ]])
        .await;

        let broker = AdbServerBroker::new(addr, Duration::from_secs(5));
        let link = AdbLink {
            broker,
            serial: "tv-serial".into(),
        };
        let output = link.run("input keyevent 26").await.unwrap();
        assert_eq!(output, "done\n");
        assert_eq!(
            server.await.unwrap(),
            vec!["host:transport:tv-serial", "shell:input keyevent 26"]
        );
    }

    #[tokio::test]
    async fn fail_status_carries_message() {
        let mut reply = b"FAIL".to_vec();
        reply.extend(framed("device offline"));
        let (addr, _server) =
            scripted_server(vec![vec![("host:transport:tv-serial", reply)]]).await;

        let broker = AdbServerBroker::new(addr, Duration::from_secs(5));
        let err = broker.shell("tv-serial", "echo test").await.err().unwrap();
        assert!(matches!(err, BrokerError::Refused(msg) if msg == "device offline"));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let _server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let broker = AdbServerBroker::new(addr, Duration::from_millis(100));
        let err = broker.shell("tv-serial", "echo test").await.err().unwrap();
        assert!(matches!(err, BrokerError::Timeout(_)));
    }
}
