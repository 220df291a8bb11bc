use std::fmt;

use super::enums::{RecordClass, RecordType};
use super::{Name, ParseError, read_u16};

/// A single question-section entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Question {
    pub name: Name,
    pub qtype: RecordType,
    pub qclass: RecordClass,
}

impl Question {
    pub fn new(name: Name, qtype: RecordType, qclass: RecordClass) -> Self {
        Self { name, qtype, qclass }
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        self.name.write_wire(out);
        out.extend_from_slice(&self.qtype.to_u16().to_be_bytes());
        out.extend_from_slice(&self.qclass.to_u16().to_be_bytes());
    }

    pub fn read(buf: &[u8], pos: &mut usize) -> Result<Self, ParseError> {
        let name = Name::read_wire(buf, pos)?;
        let qtype = RecordType::from_u16(read_u16(buf, pos)?);
        let qclass = RecordClass::from_u16(read_u16(buf, pos)?);
        Ok(Self { name, qtype, qclass })
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.qclass, self.qtype)
    }
}
