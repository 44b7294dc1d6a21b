//! Remote procedure service: process queries, machine information and
//! registry/configuration iteration.
//!
//! Uses the same command envelope as the filesystem service, but the
//! payloads are variable-layout and responses lean on NUL-terminated
//! strings. Dropping the service sends the server a bare "Close"
//! notification, which takes no response.

use crate::buffer::Buffer;
use crate::channel::Channel;
use crate::error::{Error, ErrorKind, Result};
use crate::ncp::Ncp;
use crate::time::PsiTime;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Copy, Clone)]
enum Command {
    QueryDrive = 0x02,
    GetCmdLine = 0x0a,
    GetMachineInfo = 0x64,
    RegOpenIter = 0x66,
    ConfigOpen = 0x6c,
    ConfigRead = 0x6d,
}

impl Command {
    fn value(self) -> u16 {
        self as u16
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BatteryStatus {
    Dead,
    VeryLow,
    NotGood,
    Good,
    Unknown,
}

impl BatteryStatus {
    fn from_dword(v: u32) -> BatteryStatus {
        match v {
            0 => BatteryStatus::Dead,
            1 => BatteryStatus::VeryLow,
            2 => BatteryStatus::NotGood,
            3 => BatteryStatus::Good,
            _ => BatteryStatus::Unknown,
        }
    }
}

/// One process reported by `query_drive`. The device appends `.$pid` to
/// the process name; entries without it get pid 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub args: String,
}

/// The 256-byte machine information record, field by field.
#[derive(Debug, Clone)]
pub struct MachineInfo {
    pub machine_type: u32,
    pub machine_name: String,
    pub rom_major: u8,
    pub rom_minor: u8,
    pub rom_build: u16,
    pub display_width: u32,
    pub display_height: u32,
    pub machine_uid: u64,
    pub time: PsiTime,
    pub country_code: u32,
    pub utc_offset: i32,
    pub dst_zones: u32,
    pub home_zone: u32,
    pub main_battery_insertion: PsiTime,
    pub main_battery_status: BatteryStatus,
    pub main_battery_used: PsiTime,
    pub main_battery_current: u32,
    pub main_battery_used_power: u32,
    pub main_battery_voltage: u32,
    pub main_battery_max_voltage: u32,
    pub backup_battery_status: BatteryStatus,
    pub backup_battery_voltage: u32,
    pub backup_battery_max_voltage: u32,
    pub backup_battery_used: PsiTime,
    pub external_power: bool,
    pub ram_size: u32,
    pub rom_size: u32,
    pub ram_max_free: u32,
    pub ram_free: u32,
    pub ram_disk_size: u32,
    pub registry_size: u32,
    pub rom_programmable: bool,
    pub ui_language: u32,
}

pub struct Rpcs {
    chan: Channel,
    // Session handle for the registry/config iteration calls.
    iter_handle: Option<u32>,
}

impl Rpcs {
    pub fn new(ncp: Rc<RefCell<Ncp>>) -> Rpcs {
        Rpcs {
            chan: Channel::new(ncp, "SYS$RPCS"),
            iter_handle: None,
        }
    }

    /// List the processes running from a drive.
    pub fn query_drive(&mut self, drive: char) -> Result<Vec<ProcessInfo>> {
        let mut a = Buffer::new();
        a.add_byte(drive as u8);
        let mut resp = self.chan.request(Command::QueryDrive.value(), &a)?;
        let mut processes = Vec::new();
        while !resp.is_empty() {
            let raw = take_string(&mut resp)?;
            let args = take_string(&mut resp)?;
            let (name, pid) = match raw.find(".$") {
                Some(i) => (raw[..i].to_string(), raw[i + 2..].parse().unwrap_or(0)),
                None => (raw.clone(), 0),
            };
            processes.push(ProcessInfo { pid, name, args });
        }
        Ok(processes)
    }

    /// Command line of a running process.
    pub fn get_cmdline(&mut self, process: &str) -> Result<Vec<u8>> {
        let mut a = Buffer::new();
        a.add_string_t(process);
        let resp = self.chan.request(Command::GetCmdLine.value(), &a)?;
        Ok(resp.as_slice().to_vec())
    }

    /// Fetch and decode the fixed-layout machine information record.
    pub fn get_machine_info(&mut self) -> Result<MachineInfo> {
        let resp = self
            .chan
            .request(Command::GetMachineInfo.value(), &Buffer::new())?;
        if resp.len() != 256 {
            return Err(Error::new(
                ErrorKind::Unknown,
                &format!("machine info record has {} bytes, not 256", resp.len()),
            ));
        }
        let d = |off: usize| resp.dword_at(off).unwrap_or(0);
        let name_raw = resp.bytes_at(16, 16).unwrap_or(&[]);
        let name_end = name_raw.iter().position(|b| *b == 0).unwrap_or(16);
        Ok(MachineInfo {
            machine_type: d(0),
            machine_name: String::from_utf8_lossy(&name_raw[..name_end]).into_owned(),
            rom_major: resp.byte_at(4).unwrap_or(0),
            rom_minor: resp.byte_at(5).unwrap_or(0),
            rom_build: resp.word_at(6).unwrap_or(0),
            display_width: d(32),
            display_height: d(36),
            machine_uid: ((d(44) as u64) << 32) | d(40) as u64,
            time: PsiTime::new(d(52), d(48)),
            country_code: d(56),
            utc_offset: d(60) as i32,
            dst_zones: d(64),
            home_zone: d(68),
            main_battery_insertion: PsiTime::new(d(76), d(72)),
            main_battery_status: BatteryStatus::from_dword(d(80)),
            main_battery_used: PsiTime::new(d(88), d(84)),
            main_battery_current: d(92),
            main_battery_used_power: d(96),
            main_battery_voltage: d(100),
            main_battery_max_voltage: d(104),
            backup_battery_status: BatteryStatus::from_dword(d(108)),
            backup_battery_voltage: d(112),
            backup_battery_max_voltage: d(116),
            backup_battery_used: PsiTime::new(d(128), d(124)),
            external_power: d(120) != 0,
            ram_size: d(136),
            rom_size: d(140),
            ram_max_free: d(144),
            ram_free: d(148),
            ram_disk_size: d(152),
            registry_size: d(156),
            rom_programmable: d(160) != 0,
            ui_language: d(164),
        })
    }

    /// Open a registry iteration rooted at `key`. The session handle is
    /// kept on the service for the subsequent reads.
    pub fn reg_open_iter(&mut self, key: &str) -> Result<()> {
        let mut a = Buffer::new();
        a.add_string_t(key);
        let resp = self.chan.request(Command::RegOpenIter.value(), &a)?;
        self.iter_handle = Some(resp.dword_at(0).ok_or_else(Error::truncated)?);
        Ok(())
    }

    /// Open the machine configuration for iteration.
    pub fn config_open(&mut self) -> Result<()> {
        let resp = self
            .chan
            .request(Command::ConfigOpen.value(), &Buffer::new())?;
        self.iter_handle = Some(resp.dword_at(0).ok_or_else(Error::truncated)?);
        Ok(())
    }

    /// One chunk of the open iteration; an empty chunk marks the end.
    pub fn config_read(&mut self) -> Result<Vec<u8>> {
        let handle = self
            .iter_handle
            .ok_or_else(|| Error::new(ErrorKind::BadHandle, "no open config session"))?;
        let mut a = Buffer::new();
        a.add_dword(handle);
        let resp = self.chan.request(Command::ConfigRead.value(), &a)?;
        Ok(resp.as_slice().to_vec())
    }

    /// Drain the open iteration to its end.
    pub fn config_read_all(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let chunk = self.config_read()?;
            if chunk.is_empty() {
                break;
            }
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

/// Consume one NUL-terminated string off the front of a response.
fn take_string(b: &mut Buffer) -> Result<String> {
    let len = b
        .as_slice()
        .iter()
        .position(|c| *c == 0)
        .ok_or_else(Error::truncated)?;
    let s = String::from_utf8_lossy(b.bytes_at(0, len).unwrap_or(&[])).into_owned();
    b.discard_first_bytes(len + 1);
    Ok(s)
}

impl Drop for Rpcs {
    fn drop(&mut self) {
        // One-way shutdown notice; the server does not answer it.
        if self.chan.is_connected() {
            let mut b = Buffer::new();
            b.add_string_t("Close");
            let _ = self.chan.send_raw(&b);
        }
    }
}
