use std::io::{BufRead, BufReader, ErrorKind};
use std::net::TcpStream;
use std::sync::Arc;

use pbx_wire::Command;

use crate::registry::Pbx;
use crate::tu::Tu;

/// Serve one client connection: bind a unit to it, register, pump commands
/// until the transport closes, then unwind.
///
/// Runs on its own thread. The read half stays private to this loop; the
/// unit owns the write half. Workers never talk to each other except
/// through units and the registry.
pub fn client_session(pbx: Arc<Pbx>, stream: TcpStream) {
    let reader = match stream.try_clone() {
        Ok(reader) => reader,
        Err(e) => {
            tracing::error!("failed to clone client stream: {}", e);
            return;
        }
    };

    let tu = Tu::new(Box::new(stream));
    let ext = match pbx.register_auto(&tu) {
        Ok(ext) => ext,
        Err(e) => {
            tracing::warn!("refusing connection, registration failed: {}", e);
            tu.shutdown_link();
            return;
        }
    };

    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break, // end of stream
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::debug!("read failed on extension {}: {}", ext, e);
                break;
            }
        }

        // Commands are ASCII; anything else can only come from a confused
        // client and will fail to parse below
        let text = String::from_utf8_lossy(&line);
        tracing::debug!("<- ext {} {:?}", ext, text.trim_end());

        let Some(command) = Command::parse(&text) else {
            // Unknown input gets no reaction at all
            continue;
        };
        let outcome = match command {
            Command::Pickup => tu.pickup(),
            Command::Hangup => tu.hangup(),
            Command::Dial(target_ext) => pbx.dial(&tu, target_ext),
            Command::Chat(msg) => tu.chat(&msg),
        };
        if let Err(e) = outcome {
            // Transitions already stand; either the client resynchronizes
            // on the next notification or the dead link ends this loop
            tracing::debug!("operation failed on extension {}: {}", ext, e);
        }
    }

    // Client departure: release any peer, then the slot
    tracing::info!("client on extension {} disconnected", ext);
    if let Err(e) = tu.hangup() {
        tracing::debug!("hangup on disconnect failed for extension {}: {}", ext, e);
    }
    if let Err(e) = pbx.unregister(&tu) {
        tracing::warn!("unregister failed for extension {}: {}", ext, e);
    }
}
