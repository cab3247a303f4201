//! HDF5 containers, read with a small pure-Rust parser.
//!
//! Only the structures needed to list groups and datasets are decoded:
//!
//! - superblock versions 0–3
//! - object headers v1 and v2 (`OHDR`/`OCHK`), following continuations
//! - old-style groups (symbol table message → v1 B-tree → `SNOD` + local heap)
//! - new-style compact groups (link messages)
//! - dataspace and datatype messages for dataset shapes and element types
//!
//! Dense link storage (fractal heaps) is not traversed; such groups set
//! `hdf_truncated`. Checksums are not verified. HDF4 files are recognised by
//! their magic number and reported as an unsupported subformat.

use std::collections::{HashSet, VecDeque};
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use super::{Extractor, Sniff};
use crate::config::ExtractConfig;
use crate::error::ExtractionError;
use crate::models::{FileEntry, Fields};

pub const HDF5_SIGNATURE: &[u8; 8] = b"\x89HDF\r\n\x1a\n";
pub const HDF4_MAGIC: &[u8; 4] = &[0x0E, 0x03, 0x13, 0x01];

/// Largest single structure read; anything bigger is treated as corrupt.
const MAX_BLOCK_BYTES: usize = 16 * 1024 * 1024;
const MAX_HEADER_MESSAGES: usize = 4096;
const MAX_CONTINUATIONS: usize = 64;
const MAX_BTREE_DEPTH: usize = 32;

const MSG_DATASPACE: u16 = 0x0001;
const MSG_LINK_INFO: u16 = 0x0002;
const MSG_DATATYPE: u16 = 0x0003;
const MSG_LINK: u16 = 0x0006;
const MSG_GROUP_INFO: u16 = 0x000A;
const MSG_CONTINUATION: u16 = 0x0010;
const MSG_SYMBOL_TABLE: u16 = 0x0011;

#[derive(Debug, Error)]
enum HdfError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Format(String),
    #[error("{0}")]
    Unsupported(String),
}

fn format_err(message: impl Into<String>) -> HdfError {
    HdfError::Format(message.into())
}

fn to_extraction_error(path: &Path, err: HdfError) -> ExtractionError {
    match err {
        HdfError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            ExtractionError::corrupt(path, "truncated HDF5 structure")
        }
        HdfError::Io(e) => ExtractionError::unreadable(path, &e),
        HdfError::Format(m) => ExtractionError::corrupt(path, m),
        HdfError::Unsupported(m) => ExtractionError::unsupported(path, m),
    }
}

pub struct HdfExtractor {
    max_objects: usize,
    max_depth: usize,
}

impl HdfExtractor {
    pub fn new(config: &ExtractConfig) -> Self {
        Self {
            max_objects: config.max_hdf_objects,
            max_depth: config.max_hdf_depth,
        }
    }
}

impl Extractor for HdfExtractor {
    fn name(&self) -> &str {
        "hdf"
    }

    fn can_handle(&self, entry: &FileEntry, sniff: &Sniff) -> bool {
        entry.has_extension(&["h5", "hdf5", "he5", "hdf", "h4", "hdf4", "nc4"])
            || sniff.starts_with(HDF5_SIGNATURE)
            || sniff.starts_with(HDF4_MAGIC)
    }

    fn extract(&self, entry: &FileEntry) -> Result<Fields, ExtractionError> {
        let path = entry.path.as_path();
        let file = File::open(path).map_err(|e| ExtractionError::unreadable(path, &e))?;
        let len = file
            .metadata()
            .map_err(|e| ExtractionError::unreadable(path, &e))?
            .len();
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        if reader.read_exact(&mut magic).is_ok() && &magic == HDF4_MAGIC {
            return Err(ExtractionError::unsupported(
                path,
                "HDF4 files are not supported",
            ));
        }

        let superblock =
            Superblock::locate(&mut reader, len).map_err(|e| to_extraction_error(path, e))?;
        let mut hdf = HdfFile {
            inner: reader,
            len,
            base: superblock.base,
            sizes: superblock.sizes,
        };
        let root = hdf
            .object_header(superblock.root)
            .map_err(|e| to_extraction_error(path, e))?;

        let mut walk = Walk::new(self.max_objects, self.max_depth);
        walk.visited.insert(superblock.root);
        walk.walk_group(&mut hdf, &root, "/", 1);
        walk.datasets.sort_by(|a, b| a.name.cmp(&b.name));

        let mut fields = Fields::new();
        fields.insert("format".into(), Value::String("HDF5".into()));
        fields.insert(
            "superblock_version".into(),
            Value::from(superblock.version),
        );
        fields.insert("root_members".into(), json!(walk.root_members));
        fields.insert("groups".into(), json!(walk.groups));
        fields.insert("dataset_count".into(), Value::from(walk.datasets.len()));
        fields.insert(
            "dataset_bytes".into(),
            Value::from(
                walk.datasets
                    .iter()
                    .filter_map(DatasetInfo::byte_size)
                    .fold(0u64, u64::saturating_add),
            ),
        );
        fields.insert(
            "datasets".into(),
            Value::Array(walk.datasets.iter().map(DatasetInfo::to_json).collect()),
        );
        fields.insert("hdf_truncated".into(), Value::Bool(walk.truncated));
        Ok(fields)
    }
}

#[derive(Debug, Clone, Copy)]
struct Sizes {
    offset: u8,
    length: u8,
}

impl Sizes {
    fn new(offset: u8, length: u8) -> Result<Self, HdfError> {
        let valid = |n: u8| matches!(n, 2 | 4 | 8);
        if !valid(offset) || !valid(length) {
            return Err(format_err(format!(
                "invalid offset/length sizes {}/{}",
                offset, length
            )));
        }
        Ok(Self { offset, length })
    }

    fn read_addr(&self, c: &mut Cursor<&[u8]>) -> io::Result<u64> {
        c.read_uint::<LittleEndian>(self.offset as usize)
    }

    fn read_len(&self, c: &mut Cursor<&[u8]>) -> io::Result<u64> {
        c.read_uint::<LittleEndian>(self.length as usize)
    }

    fn is_undefined(&self, addr: u64) -> bool {
        addr == u64::MAX >> (64 - 8 * u32::from(self.offset))
    }
}

#[derive(Debug)]
struct Superblock {
    version: u8,
    sizes: Sizes,
    base: u64,
    root: u64,
}

impl Superblock {
    /// Search for the signature at 0, 512, 1024, 2048, ...
    fn locate<R: Read + Seek>(reader: &mut R, len: u64) -> Result<Self, HdfError> {
        let mut offset = 0u64;
        while offset + 8 <= len {
            reader.seek(SeekFrom::Start(offset))?;
            let mut sig = [0u8; 8];
            reader.read_exact(&mut sig)?;
            if &sig == HDF5_SIGNATURE {
                let available = (len - offset).min(256) as usize;
                let mut buf = vec![0u8; available];
                reader.seek(SeekFrom::Start(offset))?;
                reader.read_exact(&mut buf)?;
                return Self::parse(&buf, offset);
            }
            offset = if offset == 0 { 512 } else { offset * 2 };
        }
        Err(format_err("no HDF5 superblock signature"))
    }

    fn parse(buf: &[u8], at: u64) -> Result<Self, HdfError> {
        let mut c = Cursor::new(buf);
        c.set_position(8);
        let version = c.read_u8()?;
        let (sizes, base, root) = match version {
            0 | 1 => {
                c.set_position(13);
                let sizes = Sizes::new(c.read_u8()?, c.read_u8()?)?;
                // reserved, leaf K, internal K, consistency flags
                c.set_position(24);
                if version == 1 {
                    c.set_position(28);
                }
                let base = sizes.read_addr(&mut c)?;
                for _ in 0..3 {
                    sizes.read_addr(&mut c)?;
                }
                // Root symbol table entry: link name offset, header address.
                sizes.read_addr(&mut c)?;
                let root = sizes.read_addr(&mut c)?;
                (sizes, base, root)
            }
            2 | 3 => {
                let sizes = Sizes::new(c.read_u8()?, c.read_u8()?)?;
                c.read_u8()?;
                let base = sizes.read_addr(&mut c)?;
                sizes.read_addr(&mut c)?;
                sizes.read_addr(&mut c)?;
                let root = sizes.read_addr(&mut c)?;
                (sizes, base, root)
            }
            v => {
                return Err(HdfError::Unsupported(format!(
                    "HDF5 superblock version {} is not supported",
                    v
                )))
            }
        };
        if sizes.is_undefined(root) {
            return Err(format_err("superblock has no root group"));
        }
        Ok(Self {
            version,
            sizes,
            base: if base == 0 { at } else { base },
            root,
        })
    }
}

#[derive(Debug)]
struct Message {
    kind: u16,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct ObjectHeader {
    messages: Vec<Message>,
}

impl ObjectHeader {
    fn find(&self, kind: u16) -> Option<&Message> {
        self.messages.iter().find(|m| m.kind == kind)
    }

    fn all(&self, kind: u16) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(move |m| m.kind == kind)
    }

    fn is_group(&self) -> bool {
        self.messages.iter().any(|m| {
            matches!(
                m.kind,
                MSG_SYMBOL_TABLE | MSG_LINK | MSG_LINK_INFO | MSG_GROUP_INFO
            )
        })
    }

    fn is_dataset(&self) -> bool {
        self.find(MSG_DATASPACE).is_some() && self.find(MSG_DATATYPE).is_some()
    }
}

struct LocalHeap {
    data: Vec<u8>,
}

impl LocalHeap {
    fn name_at(&self, offset: u64) -> Option<String> {
        let rest = self.data.get(usize::try_from(offset).ok()?..)?;
        let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        Some(String::from_utf8_lossy(&rest[..end]).into_owned())
    }
}

struct HdfFile<R> {
    inner: R,
    len: u64,
    base: u64,
    sizes: Sizes,
}

impl<R: Read + Seek> HdfFile<R> {
    fn read_at(&mut self, addr: u64, len: usize) -> Result<Vec<u8>, HdfError> {
        if len > MAX_BLOCK_BYTES {
            return Err(format_err(format!("structure of {} bytes is too large", len)));
        }
        let pos = self
            .base
            .checked_add(addr)
            .ok_or_else(|| format_err("address overflow"))?;
        match pos.checked_add(len as u64) {
            Some(end) if end <= self.len => {}
            _ => {
                return Err(format_err(format!(
                    "read of {} bytes at {:#x} is past end of file",
                    len, pos
                )))
            }
        }
        self.inner.seek(SeekFrom::Start(pos))?;
        let mut buf = vec![0u8; len];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Like [`read_at`](Self::read_at) but shortened at end of file.
    fn read_upto(&mut self, addr: u64, len: usize) -> Result<Vec<u8>, HdfError> {
        let pos = self.base.saturating_add(addr);
        let available = self.len.saturating_sub(pos).min(len as u64) as usize;
        self.read_at(addr, available)
    }

    fn object_header(&mut self, addr: u64) -> Result<ObjectHeader, HdfError> {
        let prefix = self.read_upto(addr, 64)?;
        if prefix.starts_with(b"OHDR") {
            self.object_header_v2(addr, &prefix)
        } else if prefix.first() == Some(&1) {
            self.object_header_v1(addr)
        } else {
            Err(format_err(format!("no object header at {:#x}", addr)))
        }
    }

    fn object_header_v1(&mut self, addr: u64) -> Result<ObjectHeader, HdfError> {
        let prefix = self.read_at(addr, 16)?;
        let mut c = Cursor::new(prefix.as_slice());
        c.set_position(2);
        let count = c.read_u16::<LittleEndian>()? as usize;
        c.read_u32::<LittleEndian>()?;
        let size = c.read_u32::<LittleEndian>()? as u64;

        let mut header = ObjectHeader::default();
        let mut blocks = VecDeque::from([(addr + 16, size)]);
        let mut followed = 0;
        while let Some((start, len)) = blocks.pop_front() {
            let block = self.read_at(start, len as usize)?;
            let mut c = Cursor::new(block.as_slice());
            while (c.position() as usize) + 8 <= block.len() && header.messages.len() < count {
                let kind = c.read_u16::<LittleEndian>()?;
                let size = c.read_u16::<LittleEndian>()? as usize;
                c.set_position(c.position() + 4);
                let data = take(&mut c, size)?;
                // Message data is padded to a multiple of eight bytes.
                let pad = (8 - size % 8) % 8;
                c.set_position(c.position() + pad as u64);
                self.push_message(&mut header, &mut blocks, kind, data)?;
            }
            followed += 1;
            if followed > MAX_CONTINUATIONS || header.messages.len() >= MAX_HEADER_MESSAGES {
                break;
            }
        }
        Ok(header)
    }

    fn object_header_v2(&mut self, addr: u64, prefix: &[u8]) -> Result<ObjectHeader, HdfError> {
        let mut c = Cursor::new(prefix);
        c.set_position(4);
        let version = c.read_u8()?;
        if version != 2 {
            return Err(HdfError::Unsupported(format!(
                "object header version {}",
                version
            )));
        }
        let flags = c.read_u8()?;
        if flags & 0x20 != 0 {
            c.set_position(c.position() + 16);
        }
        if flags & 0x10 != 0 {
            c.set_position(c.position() + 4);
        }
        let width = 1usize << (flags & 0x03);
        let chunk_size = c.read_uint::<LittleEndian>(width)?;
        let chunk_start = addr + c.position();

        let mut header = ObjectHeader::default();
        let mut blocks = VecDeque::new();
        let chunk = self.read_at(chunk_start, chunk_size as usize)?;
        self.parse_v2_messages(&chunk, flags, &mut header, &mut blocks)?;

        let mut followed = 0;
        while let Some((start, len)) = blocks.pop_front() {
            followed += 1;
            if followed > MAX_CONTINUATIONS || header.messages.len() >= MAX_HEADER_MESSAGES {
                break;
            }
            let block = self.read_at(start, len as usize)?;
            if !block.starts_with(b"OCHK") || block.len() < 8 {
                return Err(format_err("bad object header continuation block"));
            }
            self.parse_v2_messages(&block[4..block.len() - 4], flags, &mut header, &mut blocks)?;
        }
        Ok(header)
    }

    fn parse_v2_messages(
        &mut self,
        region: &[u8],
        header_flags: u8,
        header: &mut ObjectHeader,
        blocks: &mut VecDeque<(u64, u64)>,
    ) -> Result<(), HdfError> {
        let tracks_order = header_flags & 0x04 != 0;
        let prefix_len = if tracks_order { 6 } else { 4 };
        let mut c = Cursor::new(region);
        // Anything shorter than a message prefix at the end is gap.
        while (c.position() as usize) + prefix_len <= region.len() {
            let kind = u16::from(c.read_u8()?);
            let size = c.read_u16::<LittleEndian>()? as usize;
            c.read_u8()?;
            if tracks_order {
                c.read_u16::<LittleEndian>()?;
            }
            if c.position() as usize + size > region.len() {
                break;
            }
            let data = take(&mut c, size)?;
            self.push_message(header, blocks, kind, data)?;
        }
        Ok(())
    }

    fn push_message(
        &self,
        header: &mut ObjectHeader,
        blocks: &mut VecDeque<(u64, u64)>,
        kind: u16,
        data: Vec<u8>,
    ) -> Result<(), HdfError> {
        match kind {
            0 => {}
            MSG_CONTINUATION => {
                let mut c = Cursor::new(data.as_slice());
                let addr = self.sizes.read_addr(&mut c)?;
                let len = self.sizes.read_len(&mut c)?;
                blocks.push_back((addr, len));
            }
            _ => header.messages.push(Message { kind, data }),
        }
        Ok(())
    }

    fn local_heap(&mut self, addr: u64) -> Result<LocalHeap, HdfError> {
        let sizes = self.sizes;
        let header_len = 8 + 2 * sizes.length as usize + sizes.offset as usize;
        let raw = self.read_at(addr, header_len)?;
        if !raw.starts_with(b"HEAP") {
            return Err(format_err("bad local heap signature"));
        }
        let mut c = Cursor::new(raw.as_slice());
        c.set_position(8);
        let data_size = sizes.read_len(&mut c)?;
        sizes.read_len(&mut c)?;
        let data_addr = sizes.read_addr(&mut c)?;
        let data = self.read_at(data_addr, data_size as usize)?;
        Ok(LocalHeap { data })
    }

    /// Members of a group, as (name, object header address) pairs. The flag
    /// is set when some members could not be enumerated.
    fn group_links(&mut self, header: &ObjectHeader) -> Result<(Vec<(String, u64)>, bool), HdfError> {
        let sizes = self.sizes;
        if let Some(msg) = header.find(MSG_SYMBOL_TABLE) {
            let mut c = Cursor::new(msg.data.as_slice());
            let btree = sizes.read_addr(&mut c)?;
            let heap_addr = sizes.read_addr(&mut c)?;
            let heap = self.local_heap(heap_addr)?;
            let mut links = Vec::new();
            self.btree_entries(btree, &heap, &mut links, 0)?;
            return Ok((links, false));
        }

        let mut links = Vec::new();
        for msg in header.all(MSG_LINK) {
            if let Some(link) = parse_hard_link(&msg.data, sizes)? {
                links.push(link);
            }
        }

        let mut incomplete = false;
        if let Some(info) = header.find(MSG_LINK_INFO) {
            let mut c = Cursor::new(info.data.as_slice());
            c.read_u8()?;
            let flags = c.read_u8()?;
            if flags & 0x01 != 0 {
                c.read_u64::<LittleEndian>()?;
            }
            let fractal_heap = sizes.read_addr(&mut c)?;
            if !sizes.is_undefined(fractal_heap) {
                incomplete = true;
            }
        }
        Ok((links, incomplete))
    }

    fn btree_entries(
        &mut self,
        addr: u64,
        heap: &LocalHeap,
        out: &mut Vec<(String, u64)>,
        depth: usize,
    ) -> Result<(), HdfError> {
        if depth > MAX_BTREE_DEPTH {
            return Err(format_err("group B-tree is too deep"));
        }
        let sizes = self.sizes;
        let o = sizes.offset as usize;
        let l = sizes.length as usize;
        let raw = self.read_at(addr, 8 + 2 * o)?;
        if !raw.starts_with(b"TREE") {
            return Err(format_err("bad B-tree node signature"));
        }
        if raw[4] != 0 {
            return Err(format_err("group B-tree has a non-group node"));
        }
        let level = raw[5];
        let entries = u16::from_le_bytes([raw[6], raw[7]]) as usize;

        let body = self.read_at(addr + (8 + 2 * o) as u64, entries * (l + o) + l)?;
        let mut c = Cursor::new(body.as_slice());
        let mut children = Vec::with_capacity(entries);
        for _ in 0..entries {
            sizes.read_len(&mut c)?;
            children.push(sizes.read_addr(&mut c)?);
        }
        for child in children {
            if level > 0 {
                self.btree_entries(child, heap, out, depth + 1)?;
            } else {
                self.symbol_node(child, heap, out)?;
            }
        }
        Ok(())
    }

    fn symbol_node(
        &mut self,
        addr: u64,
        heap: &LocalHeap,
        out: &mut Vec<(String, u64)>,
    ) -> Result<(), HdfError> {
        let sizes = self.sizes;
        let raw = self.read_at(addr, 8)?;
        if !raw.starts_with(b"SNOD") {
            return Err(format_err("bad symbol table node signature"));
        }
        let count = u16::from_le_bytes([raw[6], raw[7]]) as usize;
        let entry_len = 2 * sizes.offset as usize + 24;
        let body = self.read_at(addr + 8, count * entry_len)?;
        let mut c = Cursor::new(body.as_slice());
        for _ in 0..count {
            let name_offset = sizes.read_addr(&mut c)?;
            let header = sizes.read_addr(&mut c)?;
            c.set_position(c.position() + 24);
            let name = heap
                .name_at(name_offset)
                .ok_or_else(|| format_err("symbol name outside local heap"))?;
            out.push((name, header));
        }
        Ok(())
    }
}

fn take(c: &mut Cursor<&[u8]>, n: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    c.read_exact(&mut buf)?;
    Ok(buf)
}

/// `Some((name, address))` for a hard link; soft and external links are
/// skipped.
fn parse_hard_link(data: &[u8], sizes: Sizes) -> Result<Option<(String, u64)>, HdfError> {
    let mut c = Cursor::new(data);
    c.read_u8()?;
    let flags = c.read_u8()?;
    let link_type = if flags & 0x08 != 0 { c.read_u8()? } else { 0 };
    if flags & 0x04 != 0 {
        c.read_u64::<LittleEndian>()?;
    }
    if flags & 0x10 != 0 {
        c.read_u8()?;
    }
    let name_len = c.read_uint::<LittleEndian>(1usize << (flags & 0x03))? as usize;
    if name_len > data.len() {
        return Err(format_err("link name longer than message"));
    }
    let name = String::from_utf8_lossy(&take(&mut c, name_len)?).into_owned();
    if link_type != 0 {
        return Ok(None);
    }
    Ok(Some((name, sizes.read_addr(&mut c)?)))
}

fn parse_dataspace(data: &[u8], sizes: Sizes) -> Option<Vec<u64>> {
    let mut c = Cursor::new(data);
    let version = c.read_u8().ok()?;
    let rank = c.read_u8().ok()?;
    c.read_u8().ok()?;
    if version == 1 {
        c.set_position(c.position() + 5);
    } else if c.read_u8().ok()? == 2 {
        // Null dataspace: no elements.
        return None;
    }
    (0..rank).map(|_| sizes.read_len(&mut c).ok()).collect()
}

/// numpy-style element type name and element size in bytes.
fn parse_datatype(data: &[u8]) -> Option<(String, u32)> {
    let mut c = Cursor::new(data);
    let class = c.read_u8().ok()? & 0x0F;
    let bits = c.read_u8().ok()?;
    c.set_position(4);
    let size = c.read_u32::<LittleEndian>().ok()?;
    let name = match class {
        0 if bits & 0x08 != 0 => format!("int{}", size * 8),
        0 => format!("uint{}", size * 8),
        1 => format!("float{}", size * 8),
        2 => "time".into(),
        3 => "string".into(),
        4 => "bitfield".into(),
        5 => "opaque".into(),
        6 => "compound".into(),
        7 => "reference".into(),
        8 => "enum".into(),
        9 if bits & 0x0F == 1 => "vlen_string".into(),
        9 => "vlen".into(),
        10 => "array".into(),
        _ => "unknown".into(),
    };
    Some((name, size))
}

#[derive(Debug)]
struct DatasetInfo {
    name: String,
    shape: Option<Vec<u64>>,
    dtype: Option<(String, u32)>,
}

impl DatasetInfo {
    fn from_header(name: String, header: &ObjectHeader, sizes: Sizes) -> Self {
        Self {
            name,
            shape: header
                .find(MSG_DATASPACE)
                .and_then(|m| parse_dataspace(&m.data, sizes)),
            dtype: header.find(MSG_DATATYPE).and_then(|m| parse_datatype(&m.data)),
        }
    }

    fn byte_size(&self) -> Option<u64> {
        let elements = self
            .shape
            .as_ref()?
            .iter()
            .try_fold(1u64, |acc, &d| acc.checked_mul(d))?;
        let (_, size) = self.dtype.as_ref()?;
        elements.checked_mul(u64::from(*size))
    }

    fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "shape": self.shape,
            "dtype": self.dtype.as_ref().map(|(name, _)| name.clone()),
        })
    }
}

struct Walk {
    max_objects: usize,
    max_depth: usize,
    objects: usize,
    visited: HashSet<u64>,
    root_members: Vec<String>,
    groups: Vec<String>,
    datasets: Vec<DatasetInfo>,
    truncated: bool,
}

impl Walk {
    fn new(max_objects: usize, max_depth: usize) -> Self {
        Self {
            max_objects,
            max_depth,
            objects: 0,
            visited: HashSet::new(),
            root_members: Vec::new(),
            groups: Vec::new(),
            datasets: Vec::new(),
            truncated: false,
        }
    }

    /// Visit the members of the group at `path`; members sit at `depth`.
    fn walk_group<R: Read + Seek>(
        &mut self,
        file: &mut HdfFile<R>,
        header: &ObjectHeader,
        path: &str,
        depth: usize,
    ) {
        let (mut links, incomplete) = match file.group_links(header) {
            Ok(found) => found,
            Err(e) => {
                debug!(group = path, error = %e, "could not list HDF5 group");
                self.truncated = true;
                return;
            }
        };
        if incomplete {
            self.truncated = true;
        }
        links.sort_by(|a, b| a.0.cmp(&b.0));

        for (name, addr) in links {
            let child = if path == "/" {
                format!("/{}", name)
            } else {
                format!("{}/{}", path, name)
            };
            if depth == 1 {
                self.root_members.push(name);
            }
            if !self.visited.insert(addr) {
                continue;
            }
            if self.objects >= self.max_objects {
                self.truncated = true;
                break;
            }
            self.objects += 1;

            let header = match file.object_header(addr) {
                Ok(header) => header,
                Err(e) => {
                    debug!(object = %child, error = %e, "unreadable HDF5 object header");
                    self.truncated = true;
                    continue;
                }
            };
            if header.is_group() {
                self.groups.push(child.clone());
                if depth < self.max_depth {
                    self.walk_group(file, &header, &child, depth + 1);
                } else {
                    self.truncated = true;
                }
            } else if header.is_dataset() {
                self.datasets
                    .push(DatasetInfo::from_header(child, &header, file.sizes));
            }
        }
    }
}
