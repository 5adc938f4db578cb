//! Human-readable table dumps.

use std::fmt::Write as _;
use std::io::Write;

use super::TableReader;
use crate::block::BlockIter;
use crate::error::Result;
use crate::filter::{FilterReader, FilterSettings};
use crate::iterator::InternalIterator;
use crate::key::{extract_user_key, KeyComparator};
use crate::options::{ReadOptions, DEFAULT_FILTER_POLICY_NAME};
use crate::properties::{
    find_meta_block, FILTER_BLOCK_PREFIX, FIXED_SIZE_FILTER_BLOCK_PREFIX,
    FULL_FILTER_BLOCK_PREFIX, PROPERTIES_BLOCK,
};

const RULE: &str = "--------------------------------------";

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02X}", b);
    }
    out
}

/// Every byte followed by a space; non-printable bytes become `.`.
fn spaced(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(if b.is_ascii_graphic() || b == b' ' {
            b as char
        } else {
            '.'
        });
        out.push(' ');
    }
    out
}

fn is_filter_block_name(name: &[u8]) -> bool {
    [
        FILTER_BLOCK_PREFIX,
        FULL_FILTER_BLOCK_PREFIX,
        FIXED_SIZE_FILTER_BLOCK_PREFIX,
    ]
    .iter()
    .any(|prefix| name.starts_with(prefix.as_bytes()))
}

impl TableReader {
    /// Writes the footer, meta-index, properties, filter, index and every
    /// data block to `out`.
    ///
    /// A data block that cannot be read is reported as skipped and the dump
    /// continues with the next one.
    ///
    /// # Errors
    ///
    /// Write failures, an unreadable meta-index and an unreadable index.
    pub fn dump_table<W: Write>(&self, out: &mut W) -> Result<()> {
        let rep = &self.rep;
        write!(out, "Footer Details:\n{}\n  {}\n", RULE, rep.footer)?;

        write!(out, "Metaindex Details:\n{}\n", RULE)?;
        let meta = rep.read_meta_block()?;
        let mut meta_iter = meta.iter(KeyComparator::Bytewise);
        meta_iter.seek_to_first();
        while meta_iter.valid() {
            let name = meta_iter.key();
            if name == PROPERTIES_BLOCK {
                writeln!(out, "  Properties block handle: {}", hex(meta_iter.value()))?;
            } else if is_filter_block_name(name) {
                writeln!(out, "  Filter block handle: {}", hex(meta_iter.value()))?;
            }
            meta_iter.next();
        }
        meta_iter.status()?;
        writeln!(out)?;

        if let Some(props) = &rep.table_properties {
            write!(
                out,
                "Table Properties:\n{}\n  {}\n",
                RULE,
                props.to_string_with("\n  ", ": ")
            )?;
        }

        let loaded;
        let filter = match &rep.filter {
            Some(filter) => Some(filter.as_ref()),
            None => {
                loaded = self.load_block_based_filter(&mut meta_iter);
                loaded.as_ref()
            }
        };
        if let Some(filter) = filter {
            write!(out, "Filter Details:\n{}\n  {}\n", RULE, filter.describe())?;
        }

        self.dump_index_block(out)?;
        self.dump_data_blocks(out)
    }

    /// Reads a block-based filter written with the default bloom policy,
    /// for tables opened without a preloaded filter.
    fn load_block_based_filter(&self, meta_iter: &mut BlockIter) -> Option<FilterReader> {
        let rep = &self.rep;
        let props = rep.table_properties.as_ref()?;
        if props.filter_policy_name != DEFAULT_FILTER_POLICY_NAME {
            return None;
        }
        let name = format!("{}{}", FILTER_BLOCK_PREFIX, props.filter_policy_name);
        let handle = find_meta_block(meta_iter, name.as_bytes()).ok()??;
        let contents = rep
            .read_contents(rep.base.file.as_ref(), &handle, true, true)
            .ok()?;
        let settings = FilterSettings {
            prefix_extractor: rep.reader_options.prefix_extractor.clone(),
            whole_key_filtering: rep.options.whole_key_filtering,
        };
        Some(FilterReader::block_based(settings, contents.data))
    }

    fn index_iter_for_dump<W: Write>(&self, out: &mut W) -> Result<BlockIter> {
        let index_iter = self.rep.new_index_iterator(&ReadOptions::default());
        if let Err(e) = index_iter.status() {
            out.write_all(b"Can not read Index Block \n\n")?;
            return Err(e);
        }
        Ok(index_iter)
    }

    fn dump_index_block<W: Write>(&self, out: &mut W) -> Result<()> {
        write!(out, "Index Details:\n{}\n", RULE)?;
        let mut index_iter = self.index_iter_for_dump(out)?;
        out.write_all(b"  Block key hex dump: Data block handle\n  Block key ascii\n\n")?;
        index_iter.seek_to_first();
        while index_iter.valid() {
            let user_key = extract_user_key(index_iter.key());
            writeln!(out, "  HEX    {}: {}", hex(user_key), hex(index_iter.value()))?;
            write!(out, "  ASCII  {}\n  ------\n", spaced(user_key))?;
            index_iter.next();
        }
        writeln!(out)?;
        Ok(())
    }

    fn dump_data_blocks<W: Write>(&self, out: &mut W) -> Result<()> {
        let read_options = ReadOptions::default();
        let mut index_iter = self.index_iter_for_dump(out)?;
        index_iter.seek_to_first();
        let mut block_id = 1usize;
        while index_iter.valid() {
            write!(
                out,
                "Data Block # {} @ {}\n{}\n",
                block_id,
                hex(index_iter.value()),
                RULE
            )?;
            let mut block_iter = self
                .rep
                .new_data_block_iter(&read_options, index_iter.value());
            if block_iter.status().is_err() {
                out.write_all(b"Error reading the block - Skipped \n\n")?;
            } else {
                block_iter.seek_to_first();
                while block_iter.valid() {
                    let user_key = extract_user_key(block_iter.key());
                    let value = block_iter.value();
                    writeln!(out, "  HEX    {}: {}", hex(user_key), hex(value))?;
                    write!(
                        out,
                        "  ASCII  {}: {}\n  ------\n",
                        spaced(user_key),
                        spaced(value)
                    )?;
                    block_iter.next();
                }
                if block_iter.status().is_err() {
                    out.write_all(b"Error reading the block - Skipped \n")?;
                }
                writeln!(out)?;
            }
            block_id += 1;
            index_iter.next();
        }
        index_iter.status()
    }
}
