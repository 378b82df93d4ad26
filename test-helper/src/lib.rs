use std::net::{SocketAddr, TcpListener, UdpSocket};

/// Gets a new socket address allocated by the OS.
///
/// The port is checked to be free for both TCP and UDP so the address can be
/// used for the RPC server and the membership socket alike.
pub fn get_unused_addr() -> SocketAddr {
    loop {
        let socket = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap();
        if UdpSocket::bind(addr).is_ok() {
            return addr;
        }
    }
}
