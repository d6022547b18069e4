//! Minimal telnet (RFC 854) handling for a client that negotiates nothing
//!
//! Horizons is a telnet service. A plain TCP client still has to answer option
//! negotiation and strip command sequences out of the data stream; every
//! option the server proposes is refused, which leaves the connection in the
//! default line-at-a-time NVT mode.

/// Interpret As Command
pub(crate) const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    #[default]
    Data,
    Iac,
    Negotiate(u8),
    Subnegotiation,
    SubnegotiationIac,
}

/// Result of decoding one read
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Decoded {
    /// Application data with all telnet commands removed
    pub data: Vec<u8>,
    /// Negotiation answers to write back to the server
    pub replies: Vec<u8>,
}

/// Incremental decoder; command sequences split across reads are carried over
#[derive(Debug, Default)]
pub(crate) struct TelnetCodec {
    state: State,
}

impl TelnetCodec {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn decode(&mut self, input: &[u8]) -> Decoded {
        let mut out = Decoded {
            data: Vec::with_capacity(input.len()),
            replies: Vec::new(),
        };

        for &byte in input {
            self.state = match self.state {
                State::Data if byte == IAC => State::Iac,
                State::Data => {
                    out.data.push(byte);
                    State::Data
                }
                State::Iac => match byte {
                    IAC => {
                        out.data.push(IAC);
                        State::Data
                    }
                    DO | DONT | WILL | WONT => State::Negotiate(byte),
                    SB => State::Subnegotiation,
                    // NOP, GA, AYT and friends carry no payload
                    _ => State::Data,
                },
                State::Negotiate(command) => {
                    match command {
                        DO => out.replies.extend_from_slice(&[IAC, WONT, byte]),
                        WILL => out.replies.extend_from_slice(&[IAC, DONT, byte]),
                        // DONT/WONT confirm what we already do; answering would loop
                        _ => {}
                    }
                    State::Data
                }
                State::Subnegotiation if byte == IAC => State::SubnegotiationIac,
                State::Subnegotiation => State::Subnegotiation,
                State::SubnegotiationIac if byte == SE => State::Data,
                State::SubnegotiationIac => State::Subnegotiation,
            };
        }

        out
    }
}

/// Double every IAC byte so it is sent as data
pub(crate) fn escape(bytes: &[u8]) -> Vec<u8> {
    let extra = bytes.iter().filter(|&&b| b == IAC).count();
    let mut out = Vec::with_capacity(bytes.len() + extra);
    for &byte in bytes {
        out.push(byte);
        if byte == IAC {
            out.push(IAC);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through() {
        let mut codec = TelnetCodec::new();
        let decoded = codec.decode(b"Horizons> ");
        assert_eq!(decoded.data, b"Horizons> ");
        assert!(decoded.replies.is_empty());
    }

    #[test]
    fn option_requests_are_refused() {
        let mut codec = TelnetCodec::new();
        // IAC DO TERMINAL-TYPE, IAC WILL ECHO, then text
        let decoded = codec.decode(&[IAC, DO, 24, IAC, WILL, 1, b'o', b'k']);
        assert_eq!(decoded.data, b"ok");
        assert_eq!(decoded.replies, vec![IAC, WONT, 24, IAC, DONT, 1]);
    }

    #[test]
    fn refusals_from_server_are_not_answered() {
        let mut codec = TelnetCodec::new();
        let decoded = codec.decode(&[IAC, DONT, 31, IAC, WONT, 3]);
        assert!(decoded.data.is_empty());
        assert!(decoded.replies.is_empty());
    }

    #[test]
    fn escaped_iac_is_data() {
        let mut codec = TelnetCodec::new();
        let decoded = codec.decode(&[1, IAC, IAC, 2]);
        assert_eq!(decoded.data, vec![1, IAC, 2]);
    }

    #[test]
    fn subnegotiation_is_discarded() {
        let mut codec = TelnetCodec::new();
        let decoded = codec.decode(&[b'a', IAC, SB, 24, 1, IAC, IAC, IAC, SE, b'b']);
        assert_eq!(decoded.data, b"ab");
    }

    #[test]
    fn sequences_split_across_reads_are_resumed() {
        let mut codec = TelnetCodec::new();
        let first = codec.decode(&[b'x', IAC]);
        assert_eq!(first.data, b"x");
        let second = codec.decode(&[DO]);
        assert!(second.data.is_empty() && second.replies.is_empty());
        let third = codec.decode(&[1, b'y']);
        assert_eq!(third.data, b"y");
        assert_eq!(third.replies, vec![IAC, WONT, 1]);
    }

    #[test]
    fn escape_doubles_iac() {
        assert_eq!(escape(&[b'a', IAC, b'b']), vec![b'a', IAC, IAC, b'b']);
        assert_eq!(escape(b"PAGE\r\n"), b"PAGE\r\n".to_vec());
    }
}
