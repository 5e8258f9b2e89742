use crate::codec::Reader;
use crate::error::{MalformedKind, Result, RtpError};

/// Application-defined packet (PT=204, RFC 3550 §6.7).
///
/// Decoded so a compound carrying one is not rejected; the session engine
/// does not act on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct App {
    /// Carried in the header's count field.
    pub subtype: u8,
    pub ssrc: u32,
    /// Four ASCII characters.
    pub name: [u8; 4],
    pub data: Vec<u8>,
}

impl App {
    pub(crate) fn decode_body(subtype: u8, body: &[u8]) -> Result<Self> {
        let mut r = Reader::new(body);
        let map_short = |_| RtpError::malformed(MalformedKind::AppTooShort);
        let ssrc = r.read_u32().map_err(map_short)?;
        let name = r.read_bytes(4).map_err(map_short)?;
        let data = r.read_bytes(r.remaining())?.to_vec();
        Ok(Self {
            subtype,
            ssrc,
            name: [name[0], name[1], name[2], name[3]],
            data,
        })
    }

    pub(crate) fn write_body(&self, out: &mut Vec<u8>) -> Result<u8> {
        if self.subtype > 0x1F {
            return Err(RtpError::EncodeFailure("APP subtype wider than 5 bits"));
        }
        if self.data.len() % 4 != 0 {
            return Err(RtpError::EncodeFailure("APP data not word aligned"));
        }
        out.extend_from_slice(&self.ssrc.to_be_bytes());
        out.extend_from_slice(&self.name);
        out.extend_from_slice(&self.data);
        Ok(self.subtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_name_and_data() {
        let body = [0, 0, 0, 7, b'Z', b'M', b'A', b'P', 1, 2, 3, 4];
        let app = App::decode_body(3, &body).unwrap();
        assert_eq!(app.subtype, 3);
        assert_eq!(app.ssrc, 7);
        assert_eq!(&app.name, b"ZMAP");
        assert_eq!(app.data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn too_short() {
        assert!(matches!(
            App::decode_body(0, &[0, 0, 0, 7, b'Z']),
            Err(RtpError::Malformed {
                kind: MalformedKind::AppTooShort
            })
        ));
    }
}
