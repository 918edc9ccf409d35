//! Command vocabulary of the link protocol.

// Handshake
pub const CAPAB: &str = "CAPAB";
pub const PASS: &str = "PASS";
pub const SERVER: &str = "SERVER";
pub const ERROR: &str = "ERROR";
pub const PING: &str = "PING";
pub const PONG: &str = "PONG";

// Topology
pub const SERVERLIST: &str = "SERVERLIST";
pub const SQUIT: &str = "SQUIT";
pub const ENDBURST: &str = "ENDBURST";

// Users
pub const USER: &str = "USER";
pub const NICK: &str = "NICK";
pub const SVSNICK: &str = "SVSNICK";
pub const UMODE: &str = "UMODE";
pub const QUIT: &str = "QUIT";
pub const KILL: &str = "KILL";

// Channels
pub const JOIN: &str = "JOIN";
pub const SVSJOIN: &str = "SVSJOIN";
pub const PART: &str = "PART";
pub const SVSPART: &str = "SVSPART";
pub const CHAN: &str = "CHAN";
pub const MODECH: &str = "MODECH";
pub const CHANMETA: &str = "CHANMETA";
pub const TOPIC: &str = "TOPIC";
pub const TOPICSET: &str = "TOPICSET";
pub const BAN: &str = "BAN";
pub const BANDEL: &str = "BANDEL";
pub const MEMBER: &str = "MEMBER";

// Messages
pub const PRIVMSG: &str = "PRIVMSG";
pub const NOTICE: &str = "NOTICE";

/// Commands whose first two arguments are `<message-id> <origin-sid>`.
pub const ENVELOPE_COMMANDS: &[&str] = &[
    NICK, JOIN, PART, SVSPART, SVSNICK, UMODE, SVSJOIN, QUIT, KILL, TOPIC, PRIVMSG, NOTICE, SQUIT,
];

/// Commands that are forwarded toward the owner of their target user
/// instead of being broadcast.
pub const DIRECTED_COMMANDS: &[&str] = &[KILL, SVSNICK, SVSJOIN, SVSPART];

/// Every command this protocol defines.
pub const ALL_COMMANDS: &[&str] = &[
    CAPAB, PASS, SERVER, ERROR, PING, PONG, SERVERLIST, SQUIT, ENDBURST, USER, NICK, SVSNICK,
    UMODE, QUIT, KILL, JOIN, SVSJOIN, PART, SVSPART, CHAN, MODECH, CHANMETA, TOPIC, TOPICSET, BAN,
    BANDEL, MEMBER, PRIVMSG, NOTICE,
];

/// Whether `command` is part of the protocol at all.
pub fn is_known(command: &str) -> bool {
    ALL_COMMANDS.contains(&command)
}

/// Whether `command` carries the dedup envelope.
pub fn has_envelope(command: &str) -> bool {
    ENVELOPE_COMMANDS.contains(&command)
}

/// Whether `command` is routed to a single owning server.
pub fn is_directed(command: &str) -> bool {
    DIRECTED_COMMANDS.contains(&command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_membership() {
        assert!(has_envelope(NICK));
        assert!(has_envelope(SQUIT));
        assert!(!has_envelope(SERVERLIST));
        assert!(!has_envelope(USER));
        assert!(!has_envelope(TOPICSET));
    }

    #[test]
    fn directed_commands_all_carry_envelope() {
        for cmd in DIRECTED_COMMANDS {
            assert!(has_envelope(cmd), "{cmd} must be loop-safe");
        }
        assert!(!is_directed(JOIN));
    }

    #[test]
    fn vocabulary_is_closed() {
        for cmd in ENVELOPE_COMMANDS {
            assert!(is_known(cmd));
        }
        assert!(is_known(ENDBURST));
        assert!(!is_known("WALLOPS"));
    }
}
