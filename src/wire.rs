//! Wire-format serialization of gossiped address records.
//!
//! The message codec proper lives with the peer protocol; this module only
//! defines the per-address record layout it embeds, so the address book and
//! the codec agree on one encoding:
//!
//! `timestamp (u64 LE seconds) ‖ services (u64 LE) ‖ type (u8) ‖
//! address bytes ‖ port (u16 BE)`
//!
//! TORv2 addresses travel as their bare 10-byte service key; the onion-cat
//! form is a storage detail.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{TimeZone, Utc};

use crate::{
    constants::MAX_ADDRESSES_PER_MSG,
    errors::Error,
    net_address::{NetAddress, NetAddressType, ServiceFlags},
};

/// Extends [`Write`] with the compact-size length prefix used by
/// Bitcoin-family messages.
pub trait WriteAddrExt: io::Write {
    /// Writes a `u64` using the compact-size encoding.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use addrbook::wire::WriteAddrExt;
    ///
    /// let mut buf = Vec::new();
    /// buf.write_compactsize(0x12).unwrap();
    /// assert_eq!(buf, b"\x12");
    ///
    /// let mut buf = Vec::new();
    /// buf.write_compactsize(0xaafd).unwrap();
    /// assert_eq!(buf, b"\xfd\xfd\xaa");
    /// ```
    #[inline]
    fn write_compactsize(&mut self, n: u64) -> io::Result<()> {
        match n {
            0x0000_0000..=0x0000_00fc => self.write_u8(n as u8),
            0x0000_00fd..=0x0000_ffff => {
                self.write_u8(0xfd)?;
                self.write_u16::<LittleEndian>(n as u16)
            }
            0x0001_0000..=0xffff_ffff => {
                self.write_u8(0xfe)?;
                self.write_u32::<LittleEndian>(n as u32)
            }
            _ => {
                self.write_u8(0xff)?;
                self.write_u64::<LittleEndian>(n)
            }
        }
    }
}

impl<W: io::Write + ?Sized> WriteAddrExt for W {}

/// Extends [`Read`] with the compact-size length prefix used by
/// Bitcoin-family messages.
pub trait ReadAddrExt: io::Read {
    /// Reads a `u64` using the compact-size encoding.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use addrbook::wire::ReadAddrExt;
    /// use std::io::Cursor;
    ///
    /// assert_eq!(0x12, Cursor::new(b"\x12").read_compactsize().unwrap());
    /// assert_eq!(0xaafd, Cursor::new(b"\xfd\xfd\xaa").read_compactsize().unwrap());
    /// ```
    #[inline]
    fn read_compactsize(&mut self) -> io::Result<u64> {
        let flag_byte = self.read_u8()?;
        match flag_byte {
            0xff => self.read_u64::<LittleEndian>(),
            0xfe => self.read_u32::<LittleEndian>().map(u64::from),
            0xfd => self.read_u16::<LittleEndian>().map(u64::from),
            n => Ok(u64::from(n)),
        }
    }
}

impl<R: io::Read + ?Sized> ReadAddrExt for R {}

/// The number of address bytes a record of the given type carries.
fn wire_addr_len(addr_type: NetAddressType) -> Result<usize, Error> {
    match addr_type {
        NetAddressType::Ipv4 => Ok(4),
        NetAddressType::Ipv6 => Ok(16),
        NetAddressType::TorV2 => Ok(10),
        NetAddressType::TorV3 => Ok(32),
        NetAddressType::Unknown => Err(Error::UnknownAddressType(
            "unknown addresses have no wire form",
        )),
    }
}

impl NetAddress {
    /// Writes this address as a gossip record.
    pub fn wire_serialize<W: Write>(&self, mut writer: W) -> Result<(), Error> {
        // Checked up front so nothing is written for an unencodable record.
        wire_addr_len(self.addr_type())?;

        writer.write_u64::<LittleEndian>(self.timestamp().timestamp().max(0) as u64)?;
        writer.write_u64::<LittleEndian>(self.services().bits())?;
        writer.write_u8(self.addr_type().wire_code())?;

        match self.addr_type() {
            // Strip the onion-cat prefix back off for the wire.
            NetAddressType::TorV2 => writer.write_all(&self.ip()[6..])?,
            _ => writer.write_all(self.ip())?,
        }

        writer.write_u16::<BigEndian>(self.port())?;
        Ok(())
    }

    /// Reads a gossip record back into a typed address.
    pub fn wire_deserialize<R: Read>(mut reader: R) -> Result<NetAddress, Error> {
        let timestamp = reader.read_u64::<LittleEndian>()?;
        let timestamp = Utc
            .timestamp_opt(timestamp.min(i64::MAX as u64) as i64, 0)
            .single()
            .ok_or(Error::Parse("timestamp out of range in address record"))?;

        let services = ServiceFlags::from_bits_retain(reader.read_u64::<LittleEndian>()?);
        let addr_type = NetAddressType::from_wire_code(reader.read_u8()?)?;

        let mut bytes = vec![0u8; wire_addr_len(addr_type)?];
        reader.read_exact(&mut bytes)?;

        let port = reader.read_u16::<BigEndian>()?;
        NetAddress::from_bytes(addr_type, &bytes, port, timestamp, services)
    }
}

/// Writes a compact-size count followed by the given address records.
///
/// Fails when the list exceeds [`MAX_ADDRESSES_PER_MSG`]; a list that large
/// must be split across messages by the caller.
pub fn write_address_list<W: Write>(mut writer: W, addrs: &[NetAddress]) -> Result<(), Error> {
    if addrs.len() > MAX_ADDRESSES_PER_MSG {
        return Err(Error::Parse("too many addresses for one message"));
    }
    writer.write_compactsize(addrs.len() as u64)?;
    for na in addrs {
        na.wire_serialize(&mut writer)?;
    }
    Ok(())
}

/// Reads a compact-size count followed by that many address records.
pub fn read_address_list<R: Read>(mut reader: R) -> Result<Vec<NetAddress>, Error> {
    let count = reader.read_compactsize()?;
    if count > MAX_ADDRESSES_PER_MSG as u64 {
        return Err(Error::Parse("too many addresses in message"));
    }
    let mut addrs = Vec::with_capacity(count as usize);
    for _ in 0..count {
        addrs.push(NetAddress::wire_deserialize(&mut reader)?);
    }
    Ok(addrs)
}
