use std::sync::OnceLock;

use regex::Regex;

use crate::error::ParseError;

pub const START_MARKER: &str = "START";
pub const END_MARKER: &str = "END";

/// Which collection path produced a block. Chosen by the transport, never sniffed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Interactive POSIX shell over SSH; the pty turns newlines into CRLF.
    Posix,
    /// PowerShell run over WinRM; plain newline-delimited output.
    PowerShell,
}

impl Dialect {
    pub fn script(self) -> &'static str {
        match self {
            Dialect::Posix => POSIX_SCRIPT,
            Dialect::PowerShell => POWERSHELL_SCRIPT,
        }
    }

    fn block_regex(self) -> &'static Regex {
        static POSIX: OnceLock<Regex> = OnceLock::new();
        static POWERSHELL: OnceLock<Regex> = OnceLock::new();
        match self {
            Dialect::Posix => POSIX.get_or_init(|| {
                Regex::new(r"(?ms)^START\r\n(.*?)^END\r\n").expect("valid marker regex")
            }),
            Dialect::PowerShell => POWERSHELL.get_or_init(|| {
                Regex::new(r"(?ms)^START\r?\n(.*?)^END\r?$").expect("valid marker regex")
            }),
        }
    }

    fn start_regex(self) -> &'static Regex {
        static POSIX: OnceLock<Regex> = OnceLock::new();
        static POWERSHELL: OnceLock<Regex> = OnceLock::new();
        match self {
            Dialect::Posix => {
                POSIX.get_or_init(|| Regex::new(r"(?m)^START\r\n").expect("valid marker regex"))
            }
            Dialect::PowerShell => POWERSHELL
                .get_or_init(|| Regex::new(r"(?m)^START\r?\n").expect("valid marker regex")),
        }
    }
}

// One write, one round-trip. Every fact lands on its own labelled line.
const POSIX_SCRIPT: &str = concat!(
    "echo START;",
    "echo OS:`hostnamectl | grep 'Operating System:' | awk -F': ' '{print $2}' | sed 's/ Linux//' | sed 's/ (.*)//' | sed 's/ LTS//'`;",
    "echo HOSTNAME:`hostname`;",
    "echo SWAP:`free -k|grep -i swap|awk '{print int($2/1024/1024+0.5)}'`; ",
    "echo NAS:`df -k | grep ^[1,2]|awk '{print int($2/1024/1024+0.5),$6}'`;",
    "echo Mount Point:`df -h | grep -vE '^Filesystem|/boot|/$|swap|tmp' | grep -Ff <(awk '{print $2}' /etc/fstab | grep -v -E 'UUID=|swap|/boot|/ ') | awk '{print $1, $NF, $2}'`;",
    "echo IPs:`hostname -I`;",
    "echo END\n",
);

const POWERSHELL_SCRIPT: &str = concat!(
    "Write-Host START; ",
    "Write-Host OS:(Get-CimInstance -ClassName Win32_OperatingSystem).Caption; ",
    "Write-Host HOSTNAME:$env:COMPUTERNAME; ",
    "$swapSizeMB = (Get-CimInstance -ClassName Win32_OperatingSystem).TotalVirtualMemorySize / 1MB;Write-Host SWAP:$([math]::Round($swapSizeMB, 2)); ",
    "Write-Host 'Mount Point:'(Get-PSDrive -PSProvider FileSystem | Where-Object {$_.Used -gt 0} | ForEach-Object {\"$($_.Root) $([math]::Round(($_.Used + $_.Free)/1GB, 2))GB\"}); ",
    "Write-Host IPs:(Get-NetIPAddress | Where-Object {$_.AddressFamily -eq \"IPv4\" -and $_.PrefixOrigin -eq \"Dhcp\"} | Select-Object -ExpandProperty IPAddress); ",
    "Write-Host END",
);

/// Pull the text between the START and END lines out of noisy session output.
pub fn extract_block(raw: &str, dialect: Dialect) -> Result<&str, ParseError> {
    if let Some(captures) = dialect.block_regex().captures(raw) {
        let block = captures.get(1).map_or("", |m| m.as_str());
        return Ok(block.trim());
    }
    if dialect.start_regex().is_match(raw) {
        Err(ParseError::Truncated)
    } else {
        Err(ParseError::MarkersNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_posix_block_skips_echoed_command() {
        let raw = format!(
            "Last login: Mon\r\n[root@web01 ~]# {}\r\nSTART\r\nOS:Ubuntu 22\r\nIPs:10.0.0.5\r\nEND\r\n[root@web01 ~]# ",
            POSIX_SCRIPT.trim_end()
        );
        let block = extract_block(&raw, Dialect::Posix).unwrap();
        assert_eq!(block, "OS:Ubuntu 22\r\nIPs:10.0.0.5");
    }

    #[test]
    fn test_posix_missing_end_is_truncated() {
        let raw = "START\r\nOS:Ubuntu 22\r\nHOSTNAME:web01\r\nSWAP:0\r\nNAS:";
        assert_eq!(extract_block(raw, Dialect::Posix), Err(ParseError::Truncated));
    }

    #[test]
    fn test_no_markers() {
        assert_eq!(
            extract_block("bash: hostnamectl: command not found\r\n", Dialect::Posix),
            Err(ParseError::MarkersNotFound)
        );
    }

    #[test]
    fn test_posix_requires_crlf() {
        let raw = "START\nOS:x\nEND\n";
        assert_eq!(extract_block(raw, Dialect::Posix), Err(ParseError::MarkersNotFound));
    }

    #[test]
    fn test_powershell_newline_markers() {
        let raw = "START\nOS:Microsoft Windows Server 2019 Standard\nHOSTNAME:WIN01\nEND\n";
        let block = extract_block(raw, Dialect::PowerShell).unwrap();
        assert_eq!(
            block,
            "OS:Microsoft Windows Server 2019 Standard\nHOSTNAME:WIN01"
        );
    }

    #[test]
    fn test_powershell_end_at_eof() {
        let raw = "START\nHOSTNAME:WIN01\nEND";
        assert_eq!(extract_block(raw, Dialect::PowerShell).unwrap(), "HOSTNAME:WIN01");
    }

    #[test]
    fn test_scripts_bracket_markers() {
        for dialect in [Dialect::Posix, Dialect::PowerShell] {
            let script = dialect.script();
            assert!(script.contains(START_MARKER));
            assert!(script.contains(END_MARKER));
            for label in ["OS:", "HOSTNAME:", "SWAP:", "Mount Point:", "IPs:"] {
                assert!(script.contains(label), "{label} missing from {dialect:?}");
            }
        }
        assert!(Dialect::Posix.script().ends_with('\n'));
    }
}
