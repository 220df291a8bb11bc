use super::enums::{RecordClass, RecordType, ResponseCode};
use super::{Edns, Header, Name, ParseError, Question, Rdata, Record};

/// A full DNS message. The OPT pseudo-record is lifted out of the
/// additional section into `edns` on parse and re-appended on write.
#[derive(Clone, Debug, Default)]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<Record>,
    pub authorities: Vec<Record>,
    pub additionals: Vec<Record>,
    pub edns: Option<Edns>,
}

impl Message {
    /// Build an outgoing query with RD clear; this resolver only ever
    /// speaks to authoritative servers.
    pub fn query(id: u16, question: Question) -> Self {
        Self {
            header: Header {
                id,
                qdcount: 1,
                ..Header::default()
            },
            questions: vec![question],
            ..Self::default()
        }
    }

    /// Attach or update EDNS(0) with the given payload size and DO bit.
    pub fn set_edns(&mut self, payload_size: u16, dnssec_ok: bool) {
        match &mut self.edns {
            Some(edns) => {
                edns.payload_size = payload_size;
                edns.dnssec_ok = dnssec_ok;
            }
            None => self.edns = Some(Edns::new(payload_size, dnssec_ok)),
        }
    }

    /// Response code with the EDNS extended bits folded in.
    pub fn response_code(&self) -> ResponseCode {
        let high = self.edns.as_ref().map(|e| e.extended_rcode).unwrap_or(0) as u16;
        ResponseCode::from_u16(high << 4 | self.header.rcode as u16)
    }

    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        let header = Header::read(buf)?;
        let mut pos = Header::WIRE_LEN;

        let mut questions = Vec::with_capacity(header.qdcount as usize);
        for _ in 0..header.qdcount {
            questions.push(Question::read(buf, &mut pos)?);
        }

        let mut answers = Vec::with_capacity(header.ancount as usize);
        for _ in 0..header.ancount {
            answers.push(Record::read(buf, &mut pos)?);
        }
        let mut authorities = Vec::with_capacity(header.nscount as usize);
        for _ in 0..header.nscount {
            authorities.push(Record::read(buf, &mut pos)?);
        }

        // The additional section needs raw access to OPT class/ttl, which
        // the typed Record has already interpreted, so read it by hand.
        let mut additionals = Vec::new();
        let mut edns = None;
        for _ in 0..header.arcount {
            let name = Name::read_wire(buf, &mut pos)?;
            let rtype = RecordType::from_u16(super::read_u16(buf, &mut pos)?);
            let class = super::read_u16(buf, &mut pos)?;
            let ttl = super::read_u32(buf, &mut pos)?;
            let rdlen = super::read_u16(buf, &mut pos)? as usize;
            if rtype == RecordType::OPT {
                let rdata = super::read_bytes(buf, &mut pos, rdlen)?;
                edns = Some(Edns::from_opt(class, ttl, rdata)?);
                continue;
            }
            let rdata = Rdata::read(rtype, buf, &mut pos, rdlen)?;
            additionals.push(Record {
                name,
                class: RecordClass::from_u16(class),
                ttl,
                rdata,
            });
        }

        Ok(Self { header, questions, answers, authorities, additionals, edns })
    }

    /// Serialize without name compression. Section counts are taken from
    /// the actual section contents, not the header fields.
    pub fn serialize(&self) -> Result<Vec<u8>, ParseError> {
        let mut header = self.header.clone();
        header.qdcount = self.questions.len() as u16;
        header.ancount = self.answers.len() as u16;
        header.nscount = self.authorities.len() as u16;
        header.arcount = self.additionals.len() as u16 + self.edns.is_some() as u16;

        let mut out = Vec::with_capacity(512);
        header.write(&mut out)?;
        for question in &self.questions {
            question.write(&mut out);
        }
        for record in self.answers.iter().chain(&self.authorities).chain(&self.additionals) {
            record.write(&mut out);
        }
        if let Some(edns) = &self.edns {
            edns.write_opt(&mut out);
        }
        Ok(out)
    }

    /// All records across answer, authority and additional sections.
    pub fn sections(&self) -> impl Iterator<Item = &Record> {
        self.answers.iter().chain(&self.authorities).chain(&self.additionals)
    }

    /// Answer-section records of `rtype` owned by `name`.
    pub fn answers_for(&self, name: &Name, rtype: RecordType) -> Vec<&Record> {
        self.answers
            .iter()
            .filter(|r| r.rtype() == rtype && &r.name == name)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::enums::RecordClass;

    #[test]
    fn query_roundtrip() {
        let question = Question::new(
            Name::parse("www.Example.com").unwrap(),
            RecordType::AAAA,
            RecordClass::IN,
        );
        let mut message = Message::query(0x1234, question.clone());
        message.set_edns(4096, true);

        let wire = message.serialize().unwrap();
        let parsed = Message::parse(&wire).unwrap();

        assert_eq!(parsed.header.id, 0x1234);
        assert_eq!(parsed.questions, vec![question.clone()]);
        // Casing survives the round trip byte-for-byte.
        assert!(parsed.questions[0].name.eq_case_sensitive(&question.name));
        let edns = parsed.edns.expect("OPT record present");
        assert_eq!(edns.payload_size, 4096);
        assert!(edns.dnssec_ok);
    }

    #[test]
    fn reserialize_is_stable() {
        let mut message = Message::query(
            7,
            Question::new(Name::parse("example.net").unwrap(), RecordType::A, RecordClass::IN),
        );
        message.set_edns(1232, false);
        let first = message.serialize().unwrap();
        let second = Message::parse(&first).unwrap().serialize().unwrap();
        assert_eq!(first, second);
    }
}
