//! Fixed, little-endian wire records for topology tokens.
//!
//! Every token starts with a `u32` kind tag; the tag determines the record
//! size. Records are `Pod` so encoding is a byte copy, and decoding reads
//! unaligned so tokens can be taken straight out of a FIFO buffer.

use bytemuck::{Pod, Zeroable};
use bytes::{BufMut, BytesMut};
use std::mem::{align_of, size_of};

use crate::topo_error::TopoError;
use crate::{FunctionType, GlobalIndex};

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// Kind tags. `0` is reserved as undefined.
pub mod kind {
    pub const VERTEX: u32 = 1;
    pub const EDGE: u32 = 2;
    pub const FINAL: u32 = 3;
    pub const EMPTY: u32 = 4;
}

// All multi-byte integers in these structs are little-endian on the wire.
// We store them pre-LE with `.to_le()` and decode with `.from_le()`.

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireVertex {
    pub kind_le: u32,
    pub multiplicity_le: u32,
    pub id_le: u64,
    pub value_bits_le: u32,
    pub reserved_le: u32, // keep zero
}

impl WireVertex {
    pub const SIZE: usize = 24;

    pub fn new(id: GlobalIndex, value: FunctionType, multiplicity: u32) -> Self {
        Self {
            kind_le: kind::VERTEX.to_le(),
            multiplicity_le: multiplicity.to_le(),
            id_le: id.to_le(),
            value_bits_le: value.to_bits().to_le(),
            reserved_le: 0,
        }
    }
    pub fn id(&self) -> GlobalIndex {
        u64::from_le(self.id_le)
    }
    pub fn value(&self) -> FunctionType {
        FunctionType::from_bits(u32::from_le(self.value_bits_le))
    }
    pub fn multiplicity(&self) -> u32 {
        u32::from_le(self.multiplicity_le)
    }
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireEdge {
    pub kind_le: u32,
    pub reserved_le: u32,
    pub source_le: u64,
    pub destination_le: u64,
}

impl WireEdge {
    pub const SIZE: usize = 24;

    pub fn new(source: GlobalIndex, destination: GlobalIndex) -> Self {
        Self {
            kind_le: kind::EDGE.to_le(),
            reserved_le: 0,
            source_le: source.to_le(),
            destination_le: destination.to_le(),
        }
    }
    pub fn source(&self) -> GlobalIndex {
        u64::from_le(self.source_le)
    }
    pub fn destination(&self) -> GlobalIndex {
        u64::from_le(self.destination_le)
    }
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireFinal {
    pub kind_le: u32,
    pub reserved_le: u32,
    pub id_le: u64,
}

impl WireFinal {
    pub const SIZE: usize = 16;

    pub fn new(id: GlobalIndex) -> Self {
        Self {
            kind_le: kind::FINAL.to_le(),
            reserved_le: 0,
            id_le: id.to_le(),
        }
    }
    pub fn id(&self) -> GlobalIndex {
        u64::from_le(self.id_le)
    }
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireEmpty {
    pub kind_le: u32,
    pub version_le: u16, // = WIRE_VERSION.to_le()
    pub reserved_le: u16,
}

impl WireEmpty {
    pub const SIZE: usize = 8;

    pub fn new() -> Self {
        Self {
            kind_le: kind::EMPTY.to_le(),
            version_le: WIRE_VERSION.to_le(),
            reserved_le: 0,
        }
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
}

impl Default for WireEmpty {
    fn default() -> Self {
        Self::new()
    }
}

// ===== Compile-time sanity checks =========================================

const _: () = {
    // Pod/Zeroable ensures no padding contains uninit when cast to bytes.
    assert!(size_of::<WireVertex>() == WireVertex::SIZE);
    assert!(size_of::<WireEdge>() == WireEdge::SIZE);
    assert!(size_of::<WireFinal>() == WireFinal::SIZE);
    assert!(size_of::<WireEmpty>() == WireEmpty::SIZE);
    assert!(align_of::<WireVertex>() == 8);
};

// ===== Decoded tokens ======================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VertexToken {
    pub id: GlobalIndex,
    pub value: FunctionType,
    /// Number of leaf patches that share the vertex.
    pub multiplicity: u32,
}

/// Tree edge from `source` (upper) to `destination` (lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeToken {
    pub source: GlobalIndex,
    pub destination: GlobalIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalToken {
    pub id: GlobalIndex,
}

/// One unit of a topology stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Token {
    Vertex(VertexToken),
    Edge(EdgeToken),
    Final(FinalToken),
    /// End of one input stream.
    Empty,
}

impl Token {
    pub fn vertex(id: GlobalIndex, value: FunctionType, multiplicity: u32) -> Self {
        Token::Vertex(VertexToken {
            id,
            value,
            multiplicity,
        })
    }

    pub fn edge(source: GlobalIndex, destination: GlobalIndex) -> Self {
        Token::Edge(EdgeToken {
            source,
            destination,
        })
    }

    pub fn finalize(id: GlobalIndex) -> Self {
        Token::Final(FinalToken { id })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Token::Vertex(_) => "VERTEX",
            Token::Edge(_) => "EDGE",
            Token::Final(_) => "FINAL",
            Token::Empty => "EMPTY",
        }
    }

    /// Encoded size in bytes.
    pub fn wire_size(&self) -> usize {
        match self {
            Token::Vertex(_) => WireVertex::SIZE,
            Token::Edge(_) => WireEdge::SIZE,
            Token::Final(_) => WireFinal::SIZE,
            Token::Empty => WireEmpty::SIZE,
        }
    }

    /// Append the wire record to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        match *self {
            Token::Vertex(v) => {
                buf.put_slice(bytemuck::bytes_of(&WireVertex::new(v.id, v.value, v.multiplicity)))
            }
            Token::Edge(e) => {
                buf.put_slice(bytemuck::bytes_of(&WireEdge::new(e.source, e.destination)))
            }
            Token::Final(f) => buf.put_slice(bytemuck::bytes_of(&WireFinal::new(f.id))),
            Token::Empty => buf.put_slice(bytemuck::bytes_of(&WireEmpty::new())),
        }
    }

    /// Decode the token at the start of `bytes`; returns it with its size.
    pub fn decode(bytes: &[u8]) -> Result<(Token, usize), TopoError> {
        let tag: [u8; 4] = bytes
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or(TopoError::TruncatedToken {
                needed: 4,
                available: bytes.len(),
            })?;
        let size = match u32::from_le_bytes(tag) {
            kind::VERTEX => WireVertex::SIZE,
            kind::EDGE => WireEdge::SIZE,
            kind::FINAL => WireFinal::SIZE,
            kind::EMPTY => WireEmpty::SIZE,
            other => return Err(TopoError::UnknownTokenKind(other)),
        };
        let record = bytes.get(..size).ok_or(TopoError::TruncatedToken {
            needed: size,
            available: bytes.len(),
        })?;
        let token = match u32::from_le_bytes(tag) {
            kind::VERTEX => {
                let w: WireVertex = bytemuck::pod_read_unaligned(record);
                Token::vertex(w.id(), w.value(), w.multiplicity())
            }
            kind::EDGE => {
                let w: WireEdge = bytemuck::pod_read_unaligned(record);
                Token::edge(w.source(), w.destination())
            }
            kind::FINAL => {
                let w: WireFinal = bytemuck::pod_read_unaligned(record);
                Token::finalize(w.id())
            }
            _ => Token::Empty,
        };
        Ok((token, size))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::{cast_slice, cast_slice_mut};

    #[test]
    fn roundtrip_wire_edge() {
        let v = vec![WireEdge::new(10, 20), WireEdge::new(30, 40)];
        let bytes: Vec<u8> = cast_slice(&v).to_vec();
        let mut out = vec![WireEdge::zeroed(); v.len()];
        cast_slice_mut(&mut out).copy_from_slice(&bytes);
        assert_eq!(out[0].source(), 10);
        assert_eq!(out[1].destination(), 40);
    }

    #[test]
    fn vertex_keeps_value_bits() {
        let w = WireVertex::new(u64::MAX - 1, -0.5, 4);
        assert_eq!(w.id(), u64::MAX - 1);
        assert_eq!(w.value(), -0.5);
        assert_eq!(w.multiplicity(), 4);
    }

    #[test]
    fn decode_from_odd_offset() {
        let mut buf = BytesMut::new();
        buf.put_u8(0xAA);
        Token::vertex(7, 1.5, 2).encode_into(&mut buf);
        Token::Empty.encode_into(&mut buf);
        let (t, n) = Token::decode(&buf[1..]).unwrap();
        assert_eq!(t, Token::vertex(7, 1.5, 2));
        assert_eq!(n, 24);
        let (t, n) = Token::decode(&buf[1 + n..]).unwrap();
        assert_eq!((t, n), (Token::Empty, 8));
    }

    #[test]
    fn decode_errors() {
        assert_eq!(
            Token::decode(&[1, 0]),
            Err(TopoError::TruncatedToken {
                needed: 4,
                available: 2
            })
        );
        assert_eq!(Token::decode(&[0; 8]), Err(TopoError::UnknownTokenKind(0)));
        let mut buf = BytesMut::new();
        Token::finalize(3).encode_into(&mut buf);
        assert!(matches!(
            Token::decode(&buf[..10]),
            Err(TopoError::TruncatedToken { needed: 16, .. })
        ));
    }

    #[test]
    fn empty_carries_version() {
        assert_eq!(WireEmpty::new().version(), WIRE_VERSION);
    }
}
