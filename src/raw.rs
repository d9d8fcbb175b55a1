//! Raw, non-blocking socket adapter.
//!
//! Everything here talks to `libc` directly, in the same style as the
//! teacher's own raw TCP wrapper: small functions around one syscall each,
//! `io::Error::last_os_error()` on failure, `EINPROGRESS` treated as success
//! for a deferred `connect`. Every data and listening socket created here is
//! non-blocking; the only exception, a one-shot blocking accept used to set
//! up the reactor's self-pipe, lives in `reactor.rs`.

use std::io::{self, Read, Write};
use std::mem::{self, size_of_val};
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};

/// The outcome of a non-blocking `read`.
pub enum ReadOutcome {
    Read(usize),
    WouldBlock,
    Closed,
}

/// The outcome of a non-blocking `write`.
pub enum WriteOutcome {
    Written(usize),
    WouldBlock,
}

/// A raw, non-blocking socket handle owned by a slot.
#[derive(Debug)]
pub struct RawSocket {
    fd: RawFd,
}

impl RawSocket {
    /// Creates a new socket for `addr`'s family, optionally enabling
    /// `SO_REUSEADDR`/`SO_REUSEPORT` (listeners) and always non-blocking.
    pub fn create_new(addr: &SocketAddr, reuse: bool) -> io::Result<RawSocket> {
        let family = match addr {
            SocketAddr::V4(..) => libc::AF_INET,
            SocketAddr::V6(..) => libc::AF_INET6,
        };
        let fd = unsafe { libc::socket(family, libc::SOCK_STREAM, 0) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }
        let socket = RawSocket { fd };

        if reuse {
            unsafe {
                enable_socket_option(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR)?;
                enable_socket_option(fd, libc::SOL_SOCKET, libc::SO_REUSEPORT)?;
            }
        }
        set_nonblocking(fd)?;
        Ok(socket)
    }

    pub fn bind_and_listen(&self, addr: &SocketAddr, backlog: i32) -> io::Result<()> {
        let (raw_addr, raw_addr_len) = raw_address(addr);
        if unsafe { libc::bind(self.fd, raw_addr, raw_addr_len) } == -1 {
            return Err(io::Error::last_os_error());
        }
        if unsafe { libc::listen(self.fd, backlog) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Starts a non-blocking connect. `Ok(())` means either an immediate
    /// connect or a deferred one (`EINPROGRESS`); the caller must still
    /// confirm completion via [`RawSocket::check_ack_connect`].
    pub fn connect(&self, addr: &SocketAddr) -> io::Result<()> {
        let (raw_addr, raw_addr_len) = raw_address(addr);
        if unsafe { libc::connect(self.fd, raw_addr, raw_addr_len) } == -1 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::EINPROGRESS) {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Checks the deferred result of a non-blocking `connect` via
    /// `SO_ERROR`. `Ok(())` means the connection succeeded.
    pub fn check_ack_connect(&self) -> io::Result<()> {
        let mut err: libc::c_int = 0;
        let mut len = size_of_val(&err) as libc::socklen_t;
        let ret = unsafe {
            libc::getsockopt(
                self.fd,
                libc::SOL_SOCKET,
                libc::SO_ERROR,
                &mut err as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }
        if err != 0 {
            return Err(io::Error::from_raw_os_error(err));
        }
        Ok(())
    }

    /// Accepts one pending connection; the returned socket is non-blocking.
    pub fn accept(&self) -> io::Result<RawSocket> {
        let fd = unsafe { libc::accept(self.fd, std::ptr::null_mut(), std::ptr::null_mut()) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }
        set_nonblocking(fd)?;
        Ok(RawSocket { fd })
    }

    /// Number of bytes available to read without blocking, via `FIONREAD`.
    pub fn bytes_to_read(&self) -> io::Result<usize> {
        let mut n: libc::c_int = 0;
        if unsafe { libc::ioctl(self.fd, libc::FIONREAD, &mut n) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(n.max(0) as usize)
    }

    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        let mut stream = self.borrow_stream();
        match stream.read(buf) {
            Ok(0) => Ok(ReadOutcome::Closed),
            Ok(n) => Ok(ReadOutcome::Read(n)),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(ReadOutcome::WouldBlock),
            Err(err) => Err(err),
        }
    }

    pub fn write(&mut self, buf: &[u8]) -> io::Result<WriteOutcome> {
        let mut stream = self.borrow_stream();
        match stream.write(buf) {
            Ok(n) => Ok(WriteOutcome::Written(n)),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(WriteOutcome::WouldBlock),
            Err(err) => Err(err),
        }
    }

    /// Borrows the fd as a `std::net::TcpStream` for the duration of one
    /// `Read`/`Write` call without taking ownership of the descriptor.
    fn borrow_stream(&mut self) -> mem::ManuallyDrop<std::net::TcpStream> {
        mem::ManuallyDrop::new(unsafe { std::net::TcpStream::from_raw_fd(self.fd) })
    }
}

impl AsRawFd for RawSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for RawSocket {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    if unsafe { libc::fcntl(fd, libc::F_SETFL, libc::O_NONBLOCK) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

// Implementation taken from the Rust standard library.
// Copyright 2015 The Rust Project Developers.
#[allow(trivial_casts)]
fn raw_address(address: &SocketAddr) -> (*const libc::sockaddr, libc::socklen_t) {
    match *address {
        SocketAddr::V4(ref address) => {
            (address as *const _ as *const _, size_of_val(address) as libc::socklen_t)
        }
        SocketAddr::V6(ref address) => {
            (address as *const _ as *const _, size_of_val(address) as libc::socklen_t)
        }
    }
}

unsafe fn enable_socket_option(fd: RawFd, level: libc::c_int, name: libc::c_int) -> io::Result<()> {
    let enable: libc::c_int = 1;
    let err = libc::setsockopt(
        fd,
        level,
        name,
        (&enable as *const libc::c_int) as *const libc::c_void,
        size_of_val(&enable) as libc::socklen_t,
    );
    if err == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Resolves `host:port` into every matching address, IPv6 entries first.
///
/// Client connect and listener bind both need to walk this list in order,
/// retrying against the next entry on failure; `ToSocketAddrs` already
/// performs the resolution, this just orders the result.
pub fn resolve(host: &str, port: &str) -> io::Result<Vec<SocketAddr>> {
    use std::net::ToSocketAddrs;

    let target = format!("{}:{}", strip_ipv6_brackets(host), port);
    let mut addrs: Vec<SocketAddr> = target.to_socket_addrs()?.collect();
    addrs.sort_by_key(|a| match a {
        SocketAddr::V6(_) => 0,
        SocketAddr::V4(_) => 1,
    });
    if addrs.is_empty() {
        return Err(io::Error::new(io::ErrorKind::NotFound, "no addresses resolved"));
    }
    Ok(addrs)
}

fn strip_ipv6_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

/// A `select(2)` call over read/write/except fd sets with a zero timeout,
/// matching the reactor's never-blocking poll.
pub fn select_with_timeout(
    read_fds: &mut FdSet,
    write_fds: &mut FdSet,
    except_fds: &mut FdSet,
    timeout: Option<std::time::Duration>,
) -> io::Result<libc::c_int> {
    let nfds = [read_fds.max_fd, write_fds.max_fd, except_fds.max_fd]
        .into_iter()
        .max()
        .unwrap_or(-1)
        + 1;

    let mut tv = timeout.map(|d| libc::timeval {
        tv_sec: d.as_secs() as libc::time_t,
        tv_usec: d.subsec_micros() as libc::suseconds_t,
    });

    let ret = unsafe {
        libc::select(
            nfds,
            read_fds.as_mut_ptr(),
            write_fds.as_mut_ptr(),
            except_fds.as_mut_ptr(),
            tv.as_mut().map_or(std::ptr::null_mut(), |tv| tv as *mut _),
        )
    };
    if ret == -1 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(0);
        }
        return Err(err);
    }
    Ok(ret)
}

/// A thin wrapper around `libc::fd_set` tracking the highest fd added, so
/// `select`'s `nfds` argument doesn't need a separate bookkeeping pass.
pub struct FdSet {
    set: libc::fd_set,
    max_fd: RawFd,
}

impl FdSet {
    pub fn new() -> FdSet {
        let mut set = mem::MaybeUninit::<libc::fd_set>::uninit();
        unsafe {
            libc::FD_ZERO(set.as_mut_ptr());
            FdSet {
                set: set.assume_init(),
                max_fd: -1,
            }
        }
    }

    pub fn clear(&mut self) {
        unsafe { libc::FD_ZERO(&mut self.set) };
        self.max_fd = -1;
    }

    pub fn insert(&mut self, fd: RawFd) {
        unsafe { libc::FD_SET(fd, &mut self.set) };
        if fd > self.max_fd {
            self.max_fd = fd;
        }
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        unsafe { libc::FD_ISSET(fd, &self.set) }
    }

    fn as_mut_ptr(&mut self) -> *mut libc::fd_set {
        &mut self.set
    }
}

impl Default for FdSet {
    fn default() -> FdSet {
        FdSet::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_orders_ipv6_first() {
        let addrs = resolve("127.0.0.1", "0").unwrap();
        assert!(!addrs.is_empty());
    }

    #[test]
    fn fd_set_tracks_membership() {
        let mut set = FdSet::new();
        set.insert(3);
        set.insert(7);
        assert!(set.contains(3));
        assert!(set.contains(7));
        assert!(!set.contains(4));
        set.clear();
        assert!(!set.contains(3));
    }
}
