//! Instance bootstrap payload
//!
//! Opaque bytes handed to instances at boot. Instances take them as plain
//! text; launch templates need them base64 encoded.

use base64::{engine::general_purpose, Engine as _};

/// How a payload is rendered into a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadEncoding {
    /// Text as-is
    Plain,
    /// Standard base64
    Base64,
}

/// Bootstrap payload bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapPayload(Vec<u8>);

impl BootstrapPayload {
    /// Wrap raw bytes
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Shell script that writes a small Python HTTP listener on `port`
    /// answering `Hello, world! <random number>` and starts it with nohup
    #[must_use]
    pub fn http_listener(port: u16) -> Self {
        let server = format!(
            r"
from BaseHTTPServer import HTTPServer, BaseHTTPRequestHandler
import random

random_number = random.randint(1000, 10000)

class MyHandler(BaseHTTPRequestHandler):
    def do_GET(self):
        self.send_response(200)
        self.send_header('Content-type', 'text/html')
        self.end_headers()
        self.wfile.write(b'Hello, world! '+ str(random_number).encode())

httpd = HTTPServer(('', {port}), MyHandler)
httpd.serve_forever()
"
        );

        let mut script = String::from("#!/bin/bash\n");
        script.push_str(&format!("code=\"{server}\"\n"));
        script.push_str("echo \"$code\" > server.py\n");
        script.push_str("nohup python server.py &\n");
        Self(script.into_bytes())
    }

    /// Raw payload bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Payload size in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for an empty payload
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Render for a parameter
    ///
    /// `Plain` is lossy for bytes that are not UTF-8.
    #[must_use]
    pub fn encode(&self, encoding: PayloadEncoding) -> String {
        match encoding {
            PayloadEncoding::Plain => String::from_utf8_lossy(&self.0).into_owned(),
            PayloadEncoding::Base64 => general_purpose::STANDARD.encode(&self.0),
        }
    }
}

impl Default for BootstrapPayload {
    fn default() -> Self {
        Self::http_listener(8000)
    }
}
