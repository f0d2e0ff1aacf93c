//! Notifications delivered by a transport to the connection state machine

/// Normal closure (RFC 6455 close code 1000)
pub const CLOSE_NORMAL: u16 = 1000;

/// Connection dropped without a close frame (RFC 6455 close code 1006)
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Transport lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Open handshake completed
    Open,

    /// Inbound text frame
    Message(String),

    /// Connection closed; `was_clean` is true only if the close handshake completed
    Close { was_clean: bool, code: u16 },

    /// Transport-level error; the following `Close` decides what happens next
    Error(String),
}

impl TransportEvent {
    /// Create unclean close event (abnormal closure)
    pub fn abnormal_close() -> Self {
        Self::Close {
            was_clean: false,
            code: CLOSE_ABNORMAL,
        }
    }

    /// Create clean close event with the given code
    pub fn clean_close(code: u16) -> Self {
        Self::Close {
            was_clean: true,
            code,
        }
    }

    /// Short label for logging
    pub fn label(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Message(_) => "message",
            Self::Close { .. } => "close",
            Self::Error(_) => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abnormal_close() {
        assert_eq!(
            TransportEvent::abnormal_close(),
            TransportEvent::Close {
                was_clean: false,
                code: 1006
            }
        );
    }

    #[test]
    fn test_clean_close() {
        let event = TransportEvent::clean_close(CLOSE_NORMAL);
        assert!(matches!(event, TransportEvent::Close { was_clean: true, code: 1000 }));
        assert_eq!(event.label(), "close");
    }
}
