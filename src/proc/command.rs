//! The closed set of proc commands (spec §6 "Proc commands"), grounded
//! on `ProcInterface.cc`'s `static const char* gProcName[]` dispatch
//! table — one admin or user verb per `mgm.cmd` value.

use crate::error::{MgmError, MgmResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcCommand {
    Access,
    Config,
    Node,
    Space,
    Group,
    Fs,
    Ns,
    Io,
    Fsck,
    Quota,
    Transfer,
    Debug,
    Vid,
    Rtlog,
    Chown,
    Motd,
    Version,
    Who,
    Fuse,
    File,
    FileInfo,
    Mkdir,
    Rmdir,
    Cd,
    Ls,
    Rm,
    Whoami,
    Find,
    Map,
    Attr,
    Chmod,
}

impl ProcCommand {
    pub fn parse(raw: &str) -> MgmResult<Self> {
        use ProcCommand::*;
        Ok(match raw {
            "access" => Access,
            "config" => Config,
            "node" => Node,
            "space" => Space,
            "group" => Group,
            "fs" => Fs,
            "ns" => Ns,
            "io" => Io,
            "fsck" => Fsck,
            "quota" => Quota,
            "transfer" => Transfer,
            "debug" => Debug,
            "vid" => Vid,
            "rtlog" => Rtlog,
            "chown" => Chown,
            "motd" => Motd,
            "version" => Version,
            "who" => Who,
            "fuse" => Fuse,
            "file" => File,
            "fileinfo" => FileInfo,
            "mkdir" => Mkdir,
            "rmdir" => Rmdir,
            "cd" => Cd,
            "ls" => Ls,
            "rm" => Rm,
            "whoami" => Whoami,
            "find" => Find,
            "map" => Map,
            "attr" => Attr,
            "chmod" => Chmod,
            other => return Err(MgmError::invalid(format!("unknown proc command {other}"))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_known_command() {
        for name in [
            "access", "config", "node", "space", "group", "fs", "ns", "io", "fsck", "quota", "transfer", "debug",
            "vid", "rtlog", "chown", "motd", "version", "who", "fuse", "file", "fileinfo", "mkdir", "rmdir", "cd",
            "ls", "rm", "whoami", "find", "map", "attr", "chmod",
        ] {
            assert!(ProcCommand::parse(name).is_ok(), "{name} should parse");
        }
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(ProcCommand::parse("bogus").is_err());
    }
}
