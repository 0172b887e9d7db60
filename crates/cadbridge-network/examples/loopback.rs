//! Loopback example for cadbridge-network
//!
//! Runs a server peer and a client connection in one process: the client lists all objects,
//! the server answers with a small snapshot and the client prints what reached its queue.

use cadbridge_network::{
    event_queue, BridgeEvent, Connection, ConnectionConfig, ListKind, ListSnapshot, MeshBuffers,
    RemoteObject, Request, ServerPeer,
};
use std::thread;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let peer = ServerPeer::bind("127.0.0.1:0")?;
    let addr = peer.local_addr()?;
    println!("Server peer listening on {addr}");

    let server = thread::spawn(move || -> Result<(), cadbridge_network::PeerError> {
        let mut client = peer.accept()?;
        while let Ok((request_id, request)) = client.read_request() {
            if request == Request::ListAll {
                let snapshot = ListSnapshot {
                    kind: ListKind::All,
                    filename: "demo.plasticity".into(),
                    version: 1,
                    add: vec![
                        RemoteObject::group(1, 0, "Assembly"),
                        RemoteObject::solid(
                            2,
                            1,
                            "Triangle",
                            MeshBuffers {
                                vertices: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
                                indices: vec![0, 1, 2],
                                normals: vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0],
                                groups: vec![0, 3],
                                face_ids: vec![1],
                            },
                        ),
                    ],
                };
                client.send_list(request_id, &snapshot)?;
            }
        }
        Ok(())
    });

    let (sender, queue) = event_queue();
    let mut connection = Connection::new(ConnectionConfig::default(), sender);
    connection.connect(&addr.to_string())?;

    while let Some(event) = queue.recv_timeout(Duration::from_secs(2)) {
        match event {
            BridgeEvent::Connected => {
                println!("Connected, requesting list");
                connection.list_all()?;
            }
            BridgeEvent::List(snapshot) => {
                for object in &snapshot.add {
                    println!(
                        "{:?} {} '{}' under {}",
                        object.object_type, object.id, object.name, object.parent_id
                    );
                }
                break;
            }
            other => println!("Event: {other:?}"),
        }
    }

    connection.disconnect();
    if let Ok(Err(e)) = server.join() {
        eprintln!("Server error: {e}");
    }

    println!("Loopback completed");
    Ok(())
}
