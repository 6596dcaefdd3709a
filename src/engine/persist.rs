//! On-disk artifacts: the parameter blob keyed by node index, and the
//! optimizer checkpoint (parameters plus moment estimates).
//!
//! Both are little-endian binary files with a magic/version header, so a
//! reload can fail loudly instead of misinterpreting bytes.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::backend::{Backend, Elm};
use crate::engine::node::NodeId;
use crate::engine::Graph;

const PARAMETER_MAGIC: u32 = 0x4752_5042;
const CHECKPOINT_MAGIC: u32 = 0x4752_434B;
const FORMAT_VERSION: u32 = 1;

/// Writes every trainable node's values, keyed by node index.
pub fn write_parameters<B: Backend>(path: &Path, graph: &Graph<B>) -> io::Result<()> {
    let entries = graph.parameters_by_node();
    let mut w = BufWriter::new(File::create(path)?);
    w.write_u32::<LittleEndian>(PARAMETER_MAGIC)?;
    w.write_u32::<LittleEndian>(FORMAT_VERSION)?;
    w.write_u32::<LittleEndian>(entries.len() as u32)?;
    for (id, shape, values) in entries {
        w.write_u32::<LittleEndian>(id as u32)?;
        w.write_u32::<LittleEndian>(shape.len() as u32)?;
        for dim in &shape {
            w.write_u32::<LittleEndian>(*dim as u32)?;
        }
        for v in values {
            w.write_f32::<LittleEndian>(v)?;
        }
    }
    w.flush()
}

/// Reads a parameter blob back into (node index, shape, values) entries.
pub fn read_parameters(path: &Path) -> io::Result<Vec<(NodeId, Vec<usize>, Vec<Elm>)>> {
    let mut r = BufReader::new(File::open(path)?);
    let magic = r.read_u32::<LittleEndian>()?;
    if magic != PARAMETER_MAGIC {
        return Err(invalid("not a parameter blob (bad magic number)"));
    }
    let version = r.read_u32::<LittleEndian>()?;
    if version != FORMAT_VERSION {
        return Err(invalid(format!("unsupported parameter blob version {}", version)));
    }
    let count = r.read_u32::<LittleEndian>()? as usize;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let id = r.read_u32::<LittleEndian>()? as NodeId;
        let rank = r.read_u32::<LittleEndian>()? as usize;
        let mut shape = Vec::with_capacity(rank);
        for _ in 0..rank {
            shape.push(r.read_u32::<LittleEndian>()? as usize);
        }
        let len: usize = shape.iter().product();
        let mut values = Vec::with_capacity(len);
        for _ in 0..len {
            values.push(r.read_f32::<LittleEndian>()?);
        }
        entries.push((id, shape, values));
    }
    expect_eof(&mut r)?;
    Ok(entries)
}

/// Restores a parameter blob into a rebuilt graph, validating node indices
/// and shapes against the current architecture.
pub fn attach_saved<B: Backend>(
    graph: &mut Graph<B>,
    entries: Vec<(NodeId, Vec<usize>, Vec<Elm>)>,
) -> crate::error::Result<()> {
    for (id, shape, values) in entries {
        graph.restore_node_parameter(id, &shape, values)?;
    }
    Ok(())
}

/// Optimizer state persisted between runs.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub step: u64,
    pub params: Vec<Elm>,
    pub first_moment: Vec<Elm>,
    pub second_moment: Vec<Elm>,
}

pub fn write_checkpoint(path: &Path, checkpoint: &Checkpoint) -> io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    w.write_u32::<LittleEndian>(CHECKPOINT_MAGIC)?;
    w.write_u32::<LittleEndian>(FORMAT_VERSION)?;
    w.write_u64::<LittleEndian>(checkpoint.step)?;
    for vector in [
        &checkpoint.params,
        &checkpoint.first_moment,
        &checkpoint.second_moment,
    ] {
        w.write_u64::<LittleEndian>(vector.len() as u64)?;
        for v in vector {
            w.write_f32::<LittleEndian>(*v)?;
        }
    }
    w.flush()
}

pub fn read_checkpoint(path: &Path) -> io::Result<Checkpoint> {
    let mut r = BufReader::new(File::open(path)?);
    let magic = r.read_u32::<LittleEndian>()?;
    if magic != CHECKPOINT_MAGIC {
        return Err(invalid("not a checkpoint (bad magic number)"));
    }
    let version = r.read_u32::<LittleEndian>()?;
    if version != FORMAT_VERSION {
        return Err(invalid(format!("unsupported checkpoint version {}", version)));
    }
    let step = r.read_u64::<LittleEndian>()?;
    let mut vectors = Vec::with_capacity(3);
    for _ in 0..3 {
        let len = r.read_u64::<LittleEndian>()? as usize;
        let mut vector = Vec::with_capacity(len);
        for _ in 0..len {
            vector.push(r.read_f32::<LittleEndian>()?);
        }
        vectors.push(vector);
    }
    let second_moment = vectors.pop().unwrap();
    let first_moment = vectors.pop().unwrap();
    let params = vectors.pop().unwrap();
    expect_eof(&mut r)?;
    Ok(Checkpoint {
        step,
        params,
        first_moment,
        second_moment,
    })
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn expect_eof(r: &mut impl Read) -> io::Result<()> {
    let mut buf = [0u8; 1];
    if r.read(&mut buf)? != 0 {
        return Err(invalid("trailing bytes after the last entry"));
    }
    Ok(())
}
