//! Host port allocation.

use std::net::TcpListener;

/// Finds a free TCP port on localhost, scanning upward from `start`.
pub fn find_usable_port(start: u16) -> std::io::Result<u16> {
    for port in start..=u16::MAX {
        if TcpListener::bind(("127.0.0.1", port)).is_ok() {
            return Ok(port);
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrInUse,
        format!("no usable port at or above {start}"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_a_bindable_port() {
        let port = find_usable_port(7591).unwrap();
        assert!(port >= 7591);
        // The returned port must actually be bindable.
        TcpListener::bind(("127.0.0.1", port)).unwrap();
    }

    #[test]
    fn skips_an_occupied_port() {
        let holder = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let held = holder.local_addr().unwrap().port();

        let port = find_usable_port(held).unwrap();
        assert_ne!(port, held);
        assert!(port > held);
    }
}
