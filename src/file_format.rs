//! Self-describing on-disk container for tree sequences.
//!
//! The container is a magic header followed by a stream of typed
//! entries: groups, datasets, and scalar attributes, each addressed by
//! an absolute path. Every dataset is stored as a single full-shape
//! chunk with a CRC-32 checksum over the stored bytes; compressed
//! chunks are byte-shuffled then deflated at the maximum ratio. All
//! scalars are little-endian irrespective of host.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use crc::{Crc, CRC_32_ISO_HDLC};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::debug;

use crate::tree_sequence::{alloc_column, TreeSequence};
use crate::{DumpOptions, TreeSequenceError};

/// Newest container revision this build reads and writes. Readers
/// refuse files carrying a larger `/format_version`.
pub const FILE_FORMAT_VERSION: u32 = 1;

const MAGIC: [u8; 8] = *b"treeseq\0";

const KIND_GROUP: u8 = 1;
const KIND_DATASET: u8 = 2;
const KIND_ATTRIBUTE: u8 = 3;

const CODEC_RAW: u8 = 0;
const CODEC_SHUFFLE_DEFLATE: u8 = 1;

const CHUNK_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dtype {
    U32,
    F64,
}

impl Dtype {
    fn code(self) -> u8 {
        match self {
            Dtype::U32 => 1,
            Dtype::F64 => 2,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Dtype::U32),
            2 => Some(Dtype::F64),
            _ => None,
        }
    }

    fn size(self) -> usize {
        match self {
            Dtype::U32 => 4,
            Dtype::F64 => 8,
        }
    }
}

struct DatasetDef {
    path: &'static str,
    dtype: Dtype,
    rank: u8,
}

static DATASETS: [DatasetDef; 6] = [
    DatasetDef { path: "/breakpoints", dtype: Dtype::U32, rank: 1 },
    DatasetDef { path: "/records/left", dtype: Dtype::U32, rank: 1 },
    DatasetDef { path: "/records/right", dtype: Dtype::U32, rank: 1 },
    DatasetDef { path: "/records/node", dtype: Dtype::U32, rank: 1 },
    DatasetDef { path: "/records/children", dtype: Dtype::U32, rank: 2 },
    DatasetDef { path: "/records/time", dtype: Dtype::F64, rank: 1 },
];

const ATTRIBUTES: [&str; 3] = [
    "/format_version",
    "/parameters/sample_size",
    "/parameters/num_loci",
];

fn format_err(message: impl Into<String>) -> TreeSequenceError {
    TreeSequenceError::FileFormat(message.into())
}

/// Spread element bytes so that every element's first byte comes
/// first, then every second byte, and so on. Improves deflate on
/// columns of small-magnitude values.
fn shuffle(raw: &[u8], elem_size: usize) -> Vec<u8> {
    let count = raw.len() / elem_size;
    let mut out = vec![0u8; raw.len()];
    for i in 0..count {
        for b in 0..elem_size {
            out[b * count + i] = raw[i * elem_size + b];
        }
    }
    out
}

fn unshuffle(shuffled: &[u8], elem_size: usize) -> Vec<u8> {
    let count = shuffled.len() / elem_size;
    let mut out = vec![0u8; shuffled.len()];
    for i in 0..count {
        for b in 0..elem_size {
            out[i * elem_size + b] = shuffled[b * count + i];
        }
    }
    out
}

fn u32_bytes(values: &[u32]) -> Vec<u8> {
    let mut out = vec![0u8; values.len() * 4];
    LittleEndian::write_u32_into(values, &mut out);
    out
}

fn f64_bytes(values: &[f64]) -> Vec<u8> {
    let mut out = vec![0u8; values.len() * 8];
    LittleEndian::write_f64_into(values, &mut out);
    out
}

fn write_path<W: Write>(writer: &mut W, path: &str) -> io::Result<()> {
    writer.write_u16::<LittleEndian>(path.len() as u16)?;
    writer.write_all(path.as_bytes())
}

fn write_group<W: Write>(writer: &mut W, path: &str) -> io::Result<()> {
    writer.write_u8(KIND_GROUP)?;
    write_path(writer, path)
}

fn write_chunk<W: Write>(
    writer: &mut W,
    kind: u8,
    path: &str,
    dtype: Dtype,
    dims: &[u64],
    raw: &[u8],
    compress: bool,
) -> Result<(), TreeSequenceError> {
    writer.write_u8(kind)?;
    write_path(writer, path)?;
    writer.write_u8(dtype.code())?;
    writer.write_u8(dims.len() as u8)?;
    for dim in dims {
        writer.write_u64::<LittleEndian>(*dim)?;
    }
    let (codec, stored) = if compress {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(&shuffle(raw, dtype.size()))?;
        (CODEC_SHUFFLE_DEFLATE, encoder.finish()?)
    } else {
        (CODEC_RAW, raw.to_vec())
    };
    writer.write_u8(codec)?;
    writer.write_u64::<LittleEndian>(stored.len() as u64)?;
    writer.write_u32::<LittleEndian>(CHUNK_CRC.checksum(&stored))?;
    writer.write_all(&stored)?;
    Ok(())
}

fn write_attribute<W: Write>(
    writer: &mut W,
    path: &str,
    value: u32,
) -> Result<(), TreeSequenceError> {
    write_chunk(
        writer,
        KIND_ATTRIBUTE,
        path,
        Dtype::U32,
        &[1],
        &value.to_le_bytes(),
        false,
    )
}

pub(crate) fn dump(
    ts: &TreeSequence,
    path: &Path,
    options: DumpOptions,
) -> Result<(), TreeSequenceError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&MAGIC)?;

    write_attribute(&mut writer, "/format_version", FILE_FORMAT_VERSION)?;
    write_group(&mut writer, "/parameters")?;
    write_attribute(&mut writer, "/parameters/sample_size", ts.sample_size)?;
    write_attribute(&mut writer, "/parameters/num_loci", ts.num_loci)?;
    write_group(&mut writer, "/records")?;

    let compress = options.contains(DumpOptions::COMPRESS);
    let num_records = ts.num_records() as u64;
    let flat_children: Vec<u32> = ts.children.iter().flatten().copied().collect();
    let columns: [(&DatasetDef, Vec<u8>, Vec<u64>); 6] = [
        (&DATASETS[0], u32_bytes(&ts.breakpoints), vec![ts.breakpoints.len() as u64]),
        (&DATASETS[1], u32_bytes(&ts.left), vec![num_records]),
        (&DATASETS[2], u32_bytes(&ts.right), vec![num_records]),
        (&DATASETS[3], u32_bytes(&ts.node), vec![num_records]),
        (&DATASETS[4], u32_bytes(&flat_children), vec![num_records, 2]),
        (&DATASETS[5], f64_bytes(&ts.time), vec![num_records]),
    ];
    for (def, raw, dims) in &columns {
        write_chunk(&mut writer, KIND_DATASET, def.path, def.dtype, dims, raw, compress)?;
    }
    writer.flush()?;
    debug!(
        "dumped tree sequence to {}: {} records, compress = {}",
        path.display(),
        num_records,
        compress
    );
    Ok(())
}

struct RawEntry {
    kind: u8,
    path: String,
    dtype: u8,
    dims: Vec<u64>,
    codec: u8,
    checksum: u32,
    stored: Vec<u8>,
}

impl RawEntry {
    /// Verify the checksum and undo the storage codec.
    fn chunk_bytes(&self, expect_len: usize) -> Result<Vec<u8>, TreeSequenceError> {
        if CHUNK_CRC.checksum(&self.stored) != self.checksum {
            return Err(format_err(format!("checksum mismatch in {}", self.path)));
        }
        let dtype = Dtype::from_code(self.dtype)
            .ok_or_else(|| format_err(format!("unknown element type in {}", self.path)))?;
        let raw = match self.codec {
            CODEC_RAW => self.stored.clone(),
            CODEC_SHUFFLE_DEFLATE => {
                let mut inflated = Vec::new();
                ZlibDecoder::new(self.stored.as_slice()).read_to_end(&mut inflated)?;
                unshuffle(&inflated, dtype.size())
            }
            _ => return Err(format_err(format!("unknown codec in {}", self.path))),
        };
        if raw.len() != expect_len {
            return Err(format_err(format!("short chunk in {}", self.path)));
        }
        Ok(raw)
    }
}

fn read_entry<R: Read>(reader: &mut R) -> Result<Option<RawEntry>, TreeSequenceError> {
    let kind = match reader.read_u8() {
        Ok(kind) => kind,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if kind != KIND_GROUP && kind != KIND_DATASET && kind != KIND_ATTRIBUTE {
        return Err(format_err("unknown entry kind"));
    }
    let path_len = reader.read_u16::<LittleEndian>()? as usize;
    let mut path_bytes = vec![0u8; path_len];
    reader.read_exact(&mut path_bytes)?;
    let path = String::from_utf8(path_bytes).map_err(|_| format_err("non-utf8 path"))?;
    if kind == KIND_GROUP {
        return Ok(Some(RawEntry {
            kind,
            path,
            dtype: 0,
            dims: Vec::new(),
            codec: CODEC_RAW,
            checksum: 0,
            stored: Vec::new(),
        }));
    }
    let dtype = reader.read_u8()?;
    let rank = reader.read_u8()? as usize;
    if rank == 0 || rank > 2 {
        return Err(format_err(format!("rank out of range in {path}")));
    }
    let mut dims = Vec::with_capacity(rank);
    for _ in 0..rank {
        dims.push(reader.read_u64::<LittleEndian>()?);
    }
    let codec = reader.read_u8()?;
    let stored_len = reader.read_u64::<LittleEndian>()? as usize;
    let checksum = reader.read_u32::<LittleEndian>()?;
    let mut stored = alloc_column::<u8>(stored_len)?;
    reader.read_exact(&mut stored)?;
    Ok(Some(RawEntry {
        kind,
        path,
        dtype,
        dims,
        codec,
        checksum,
        stored,
    }))
}

fn find<'e>(entries: &'e [RawEntry], kind: u8, path: &str) -> Option<&'e RawEntry> {
    entries.iter().find(|e| e.kind == kind && e.path == path)
}

fn read_scalar_attribute(entries: &[RawEntry], path: &str) -> Result<u32, TreeSequenceError> {
    let entry = find(entries, KIND_ATTRIBUTE, path)
        .ok_or_else(|| format_err(format!("missing attribute {path}")))?;
    if entry.dims != [1] {
        return Err(format_err(format!("attribute {path} is not scalar")));
    }
    if entry.dtype != Dtype::U32.code() {
        return Err(format_err(format!("wrong element type for {path}")));
    }
    let raw = entry.chunk_bytes(4)?;
    Ok(LittleEndian::read_u32(&raw))
}

fn u32_column(entry: &RawEntry, len: usize) -> Result<Vec<u32>, TreeSequenceError> {
    let raw = entry.chunk_bytes(len * 4)?;
    let mut column: Vec<u32> = alloc_column(len)?;
    LittleEndian::read_u32_into(&raw, &mut column);
    Ok(column)
}

fn f64_column(entry: &RawEntry, len: usize) -> Result<Vec<f64>, TreeSequenceError> {
    let raw = entry.chunk_bytes(len * 8)?;
    let mut column: Vec<f64> = alloc_column(len)?;
    LittleEndian::read_f64_into(&raw, &mut column);
    Ok(column)
}

pub(crate) fn load(path: &Path) -> Result<TreeSequence, TreeSequenceError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(format_err("not a tree sequence container"));
    }
    let mut entries = Vec::new();
    while let Some(entry) = read_entry(&mut reader)? {
        entries.push(entry);
    }

    // Metadata first: all three attributes, scalar-shaped, and a
    // version this build understands.
    let version = read_scalar_attribute(&entries, ATTRIBUTES[0])?;
    if version > FILE_FORMAT_VERSION {
        return Err(format_err(format!(
            "format version {version} is newer than supported {FILE_FORMAT_VERSION}"
        )));
    }
    let sample_size = read_scalar_attribute(&entries, ATTRIBUTES[1])?;
    let num_loci = read_scalar_attribute(&entries, ATTRIBUTES[2])?;

    // Every dataset present with its declared rank.
    let mut datasets: Vec<&RawEntry> = Vec::with_capacity(DATASETS.len());
    for def in &DATASETS {
        let entry = find(&entries, KIND_DATASET, def.path)
            .ok_or_else(|| format_err(format!("missing dataset {}", def.path)))?;
        if entry.dims.len() != def.rank as usize {
            return Err(format_err(format!("wrong rank for {}", def.path)));
        }
        if entry.dtype != def.dtype.code() {
            return Err(format_err(format!("wrong element type for {}", def.path)));
        }
        datasets.push(entry);
    }

    // All record columns share one leading extent.
    let num_breakpoints = datasets[0].dims[0] as usize;
    let num_records = datasets[1].dims[0] as usize;
    for (def, entry) in DATASETS.iter().zip(&datasets).skip(1) {
        if entry.dims[0] as usize != num_records {
            return Err(format_err(format!("inconsistent length for {}", def.path)));
        }
    }
    if datasets[4].dims[1] != 2 {
        return Err(format_err("wrong trailing extent for /records/children"));
    }

    // Validated; pull each dataset in one read.
    let breakpoints = u32_column(datasets[0], num_breakpoints)?;
    let left = u32_column(datasets[1], num_records)?;
    let right = u32_column(datasets[2], num_records)?;
    let node = u32_column(datasets[3], num_records)?;
    let flat_children = u32_column(datasets[4], num_records * 2)?;
    let time = f64_column(datasets[5], num_records)?;

    let mut children: Vec<[u32; 2]> = alloc_column(num_records)?;
    for (j, pair) in flat_children.chunks_exact(2).enumerate() {
        children[j] = [pair[0], pair[1]];
    }

    debug!(
        "loaded tree sequence from {}: {} records, {} breakpoints",
        path.display(),
        num_records,
        num_breakpoints
    );
    Ok(TreeSequence {
        sample_size,
        num_loci,
        breakpoints,
        left,
        right,
        node,
        children,
        time,
    })
}
