//! Persisted count tables.
//!
//! Binary layout (native-endian):
//! ```text
//! magic                "#kfbin\n" | "#kflbin\n"
//! max_k                u32        | (u16 max_k, u16 num_lengths)
//! counts[4^k]          one raw array per held length, ascending
//! ```
//! Text layout:
//! ```text
//! #kftxt               or #kfltxt
//! #Max k: <K>
//! #nk: <n>             windowed tables only
//! <k>: [<c0>|<c1>|...]
//! ```
//! Files may be gzip or zstd compressed; readers detect this from the leading
//! bytes.

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use tracing::debug;

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{KfreqError, Result};
use crate::functions::kmer_counter::{KmerCountTable, TableLayout};
use crate::utils::count_type::CountType;

pub const KF_BIN: &[u8; 7] = b"#kfbin\n";
pub const KF_TEXT: &[u8; 7] = b"#kftxt\n";
pub const KFL_BIN: &[u8; 8] = b"#kflbin\n";
pub const KFL_TEXT: &[u8; 8] = b"#kfltxt\n";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

// Elements per read when pulling a binary count array
const READ_CHUNK: usize = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Binary,
    Text,
}

impl TableFormat {
    pub fn extension(self) -> &'static str {
        match self {
            TableFormat::Binary => "bin",
            TableFormat::Text => "txt",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Zstd,
}

impl Compression {
    pub fn extension(self) -> Option<&'static str> {
        match self {
            Compression::None => None,
            Compression::Gzip => Some("gz"),
            Compression::Zstd => Some("zst"),
        }
    }
}

fn magic_for(layout: TableLayout, format: TableFormat) -> &'static [u8] {
    match (layout, format) {
        (TableLayout::Full, TableFormat::Binary) => KF_BIN,
        (TableLayout::Full, TableFormat::Text) => KF_TEXT,
        (TableLayout::Windowed { .. }, TableFormat::Binary) => KFL_BIN,
        (TableLayout::Windowed { .. }, TableFormat::Text) => KFL_TEXT,
    }
}

pub fn encode<C: CountType, W: Write>(
    kf: &KmerCountTable<C>,
    writer: &mut W,
    format: TableFormat,
) -> Result<()> {
    writer.write_all(magic_for(kf.layout(), format))?;
    match format {
        TableFormat::Binary => {
            match kf.layout() {
                TableLayout::Full => writer.write_all(&(kf.max_k() as u32).to_ne_bytes())?,
                TableLayout::Windowed { num_lengths } => {
                    writer.write_all(&(kf.max_k() as u16).to_ne_bytes())?;
                    writer.write_all(&(num_lengths as u16).to_ne_bytes())?;
                }
            }
            let mut bytes = Vec::new();
            for sf in kf.subtables() {
                for chunk in sf.counts().chunks(READ_CHUNK) {
                    bytes.clear();
                    chunk.iter().for_each(|c| c.extend_ne_bytes(&mut bytes));
                    writer.write_all(&bytes)?;
                }
            }
        }
        TableFormat::Text => {
            writeln!(writer, "#Max k: {}", kf.max_k())?;
            if let TableLayout::Windowed { num_lengths } = kf.layout() {
                writeln!(writer, "#nk: {num_lengths}")?;
            }
            for sf in kf.subtables() {
                write!(writer, "{}: [", sf.k())?;
                let (last, rest) = sf
                    .counts()
                    .split_last()
                    .ok_or_else(|| KfreqError::Format(format!("empty table for k = {}", sf.k())))?;
                for c in rest {
                    write!(writer, "{c}|")?;
                }
                writeln!(writer, "{last}]")?;
            }
        }
    }
    Ok(())
}

fn truncated(e: std::io::Error, what: &str) -> KfreqError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        KfreqError::Format(format!("truncated input while reading {what}"))
    } else {
        KfreqError::Stream(e)
    }
}

fn read_magic<R: BufRead>(reader: &mut R) -> Result<(bool, TableFormat)> {
    let mut tag = [0u8; 7];
    reader
        .read_exact(&mut tag)
        .map_err(|e| truncated(e, "magic string"))?;

    let windowed = match &tag {
        t if t == KF_BIN => return Ok((false, TableFormat::Binary)),
        t if t == KF_TEXT => return Ok((false, TableFormat::Text)),
        t if t == &KFL_BIN[..7] || t == &KFL_TEXT[..7] => true,
        _ => {
            return Err(KfreqError::Format(format!(
                "Unexpected magic string: {:?}",
                String::from_utf8_lossy(&tag)
            )));
        }
    };
    let format = if tag == KFL_BIN[..7] {
        TableFormat::Binary
    } else {
        TableFormat::Text
    };

    // Older writers dropped the newline after the windowed text tag
    let next = reader.fill_buf()?.first().copied();
    match (next, format) {
        (Some(b'\n'), _) => reader.consume(1),
        (_, TableFormat::Text) => {}
        (_, TableFormat::Binary) => {
            return Err(KfreqError::Format(
                "windowed binary magic is missing its newline".into(),
            ));
        }
    }
    Ok((windowed, format))
}

fn build_table<C: CountType>(max_k: usize, layout: TableLayout) -> Result<KmerCountTable<C>> {
    KmerCountTable::with_layout(max_k, layout).map_err(|e| match e {
        KfreqError::Config(msg) => KfreqError::Format(format!("bad table header: {msg}")),
        other => other,
    })
}

/// Reads a table, detecting binary or text from the magic tag.
pub fn decode<C: CountType, R: BufRead>(reader: &mut R) -> Result<KmerCountTable<C>> {
    let (windowed, format) = read_magic(reader)?;
    debug!("Decoding {:?} table (windowed: {windowed})", format);
    match format {
        TableFormat::Binary => decode_binary(reader, windowed),
        TableFormat::Text => decode_text(reader, windowed),
    }
}

fn read_array<const N: usize, R: Read>(reader: &mut R, what: &str) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf).map_err(|e| truncated(e, what))?;
    Ok(buf)
}

fn decode_binary<C: CountType, R: BufRead>(
    reader: &mut R,
    windowed: bool,
) -> Result<KmerCountTable<C>> {
    let (max_k, layout) = if windowed {
        let max_k = u16::from_ne_bytes(read_array(reader, "max k")?) as usize;
        let num_lengths = u16::from_ne_bytes(read_array(reader, "number of lengths")?) as usize;
        (max_k, TableLayout::Windowed { num_lengths })
    } else {
        let max_k = u32::from_ne_bytes(read_array(reader, "max k")?) as usize;
        (max_k, TableLayout::Full)
    };
    let mut kf = build_table::<C>(max_k, layout)?;

    let mut bytes = vec![0u8; READ_CHUNK * C::BYTES];
    for sf in kf.subtables_mut() {
        let k = sf.k();
        for chunk in sf.counts_mut().chunks_mut(READ_CHUNK) {
            let bytes = &mut bytes[..chunk.len() * C::BYTES];
            reader
                .read_exact(bytes)
                .map_err(|e| truncated(e, &format!("counts for k = {k}")))?;
            for (c, raw) in chunk.iter_mut().zip(bytes.chunks_exact(C::BYTES)) {
                *c = C::from_ne_slice(raw);
            }
        }
    }
    Ok(kf)
}

fn next_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>, what: &str) -> Result<()> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Err(KfreqError::Format(format!(
            "truncated input: expected {what}"
        )));
    }
    while buf.last().is_some_and(|b| b.is_ascii_whitespace()) {
        buf.pop();
    }
    Ok(())
}

fn header_value(line: &[u8], prefix: &str) -> Result<usize> {
    let text = std::str::from_utf8(line)
        .map_err(|_| KfreqError::Format("header is not valid UTF-8".into()))?;
    text.strip_prefix(prefix)
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| KfreqError::Format(format!("expected '{prefix} <n>', found {text:?}")))
}

fn decode_text<C: CountType, R: BufRead>(
    reader: &mut R,
    windowed: bool,
) -> Result<KmerCountTable<C>> {
    let mut line = Vec::new();
    next_line(reader, &mut line, "#Max k line")?;
    let max_k = header_value(&line, "#Max k:")?;
    let layout = if windowed {
        next_line(reader, &mut line, "#nk line")?;
        TableLayout::Windowed {
            num_lengths: header_value(&line, "#nk:")?,
        }
    } else {
        TableLayout::Full
    };
    let mut kf = build_table::<C>(max_k, layout)?;

    for sf in kf.subtables_mut() {
        let k = sf.k();
        next_line(reader, &mut line, &format!("counts for k = {k}"))?;
        let text = std::str::from_utf8(&line)
            .map_err(|_| KfreqError::Format(format!("counts for k = {k} are not valid UTF-8")))?;

        let (label, body) = text
            .split_once(": [")
            .ok_or_else(|| KfreqError::Format(format!("malformed record for k = {k}")))?;
        if label.trim().parse::<usize>().ok() != Some(k) {
            return Err(KfreqError::Format(format!(
                "expected record for k = {k}, found {label:?}"
            )));
        }
        let body = body
            .strip_suffix(']')
            .ok_or_else(|| KfreqError::Format(format!("unterminated record for k = {k}")))?;

        let counts = sf.counts_mut();
        let expected = counts.len();
        let mut n = 0usize;
        for field in body.split('|') {
            let value: u64 = field.trim().parse().map_err(|_| {
                KfreqError::Format(format!("bad count {field:?} for k = {k}"))
            })?;
            let slot = counts.get_mut(n).ok_or_else(|| {
                KfreqError::Format(format!("more than {expected} counts for k = {k}"))
            })?;
            *slot = C::from_u64(value).ok_or_else(|| {
                KfreqError::Format(format!("count {value} does not fit the table width"))
            })?;
            n += 1;
        }
        if n != expected {
            return Err(KfreqError::Format(format!(
                "expected {expected} counts for k = {k}, found {n}"
            )));
        }
    }
    Ok(kf)
}

fn attach_path(path: &Path) -> impl Fn(KfreqError) -> KfreqError + '_ {
    move |e| match e {
        KfreqError::Stream(source) => KfreqError::io(path, source),
        other => other,
    }
}

/// Opens a table for reading, unwrapping gzip or zstd when present.
pub fn open_table_reader(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).map_err(|e| KfreqError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let head: Vec<u8> = reader
        .fill_buf()
        .map_err(|e| KfreqError::io(path, e))?
        .iter()
        .take(ZSTD_MAGIC.len())
        .copied()
        .collect();

    if head.starts_with(&GZIP_MAGIC) {
        debug!("{} is gzip compressed", path.display());
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(reader))))
    } else if head.starts_with(&ZSTD_MAGIC) {
        debug!("{} is zstd compressed", path.display());
        let decoder = zstd::stream::read::Decoder::with_buffer(reader)
            .map_err(|e| KfreqError::io(path, e))?;
        Ok(Box::new(BufReader::new(decoder)))
    } else {
        Ok(Box::new(reader))
    }
}

pub fn read_table_file<C: CountType>(path: &Path) -> Result<KmerCountTable<C>> {
    let mut reader = open_table_reader(path)?;
    decode(&mut reader).map_err(attach_path(path))
}

pub fn write_table_file<C: CountType>(
    path: &Path,
    kf: &KmerCountTable<C>,
    format: TableFormat,
    compression: Compression,
) -> Result<()> {
    let file = File::create(path).map_err(|e| KfreqError::io(path, e))?;
    let writer = BufWriter::new(file);

    let written = match compression {
        Compression::None => {
            let mut writer = writer;
            encode(kf, &mut writer, format).and_then(|_| Ok(writer.flush()?))
        }
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(writer, flate2::Compression::default());
            encode(kf, &mut encoder, format)
                .and_then(|_| Ok(encoder.finish()?.flush()?))
        }
        Compression::Zstd => {
            let mut encoder = zstd::stream::write::Encoder::new(writer, 0)
                .map_err(|e| KfreqError::io(path, e))?;
            encode(kf, &mut encoder, format)
                .and_then(|_| Ok(encoder.finish()?.flush()?))
        }
    };
    written.map_err(attach_path(path))?;
    debug!("Wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample(k: usize) -> KmerCountTable {
        let mut kf = KmerCountTable::new(k).unwrap();
        kf.process(b"ACGTTGCAACGGATCCATGACGNNATCGATTTACGacgtgca");
        kf
    }

    fn assert_same<C: CountType>(a: &KmerCountTable<C>, b: &KmerCountTable<C>) {
        assert_eq!(a.max_k(), b.max_k());
        assert_eq!(a.layout(), b.layout());
        assert_eq!(a.subtables().len(), b.subtables().len());
        for (x, y) in a.subtables().iter().zip(b.subtables()) {
            assert_eq!(x.k(), y.k());
            assert_eq!(x.counts(), y.counts());
        }
    }

    fn round_trip<C: CountType>(kf: &KmerCountTable<C>, format: TableFormat) -> KmerCountTable<C> {
        let mut buf = Vec::new();
        encode(kf, &mut buf, format).unwrap();
        decode(&mut Cursor::new(buf)).unwrap()
    }

    #[test]
    fn binary_layout() {
        let kf = sample(2);
        let mut buf = Vec::new();
        encode(&kf, &mut buf, TableFormat::Binary).unwrap();
        assert_eq!(&buf[..7], KF_BIN);
        assert_eq!(u32::from_ne_bytes(buf[7..11].try_into().unwrap()), 2);
        assert_eq!(buf.len(), 7 + 4 + (4 + 16) * 4);
        let a = u32::from_ne_bytes(buf[11..15].try_into().unwrap());
        assert_eq!(a, kf.count_kmer(b"A").unwrap());
    }

    #[test]
    fn text_layout() {
        let mut kf: KmerCountTable = KmerCountTable::new(2).unwrap();
        kf.process(b"ACGTACGT");
        let mut buf = Vec::new();
        encode(&kf, &mut buf, TableFormat::Text).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(
            text,
            "#kftxt\n#Max k: 2\n1: [2|2|2|2]\n2: [0|2|0|0|0|0|2|0|0|0|0|2|1|0|0|0]\n"
        );
    }

    #[test]
    fn round_trips() {
        for k in [2, 3, 5] {
            let kf = sample(k);
            assert_same(&kf, &round_trip(&kf, TableFormat::Binary));
            assert_same(&kf, &round_trip(&kf, TableFormat::Text));
        }

        let mut wide: KmerCountTable<u64> = KmerCountTable::new(3).unwrap();
        wide.process(b"GGGGGGGGCCCCAT");
        assert_same(&wide, &round_trip(&wide, TableFormat::Binary));
        assert_same(&wide, &round_trip(&wide, TableFormat::Text));
    }

    #[test]
    fn windowed_round_trips() {
        let mut kf: KmerCountTable = KmerCountTable::windowed(4, 3).unwrap();
        kf.process(b"ACGTTGCAACGGATCCATGACG");

        let mut buf = Vec::new();
        encode(&kf, &mut buf, TableFormat::Binary).unwrap();
        assert_eq!(&buf[..8], KFL_BIN);
        assert_eq!(u16::from_ne_bytes(buf[8..10].try_into().unwrap()), 4);
        assert_eq!(u16::from_ne_bytes(buf[10..12].try_into().unwrap()), 3);
        assert_same(&kf, &decode(&mut Cursor::new(buf)).unwrap());

        let back = round_trip(&kf, TableFormat::Text);
        assert_same(&kf, &back);
        assert_eq!(back.min_k(), 2);
    }

    #[test]
    fn windowed_text_without_newline_after_tag() {
        let text = "#kfltxt#Max k: 2\n#nk: 1\n2: [0|1|0|0|0|0|0|0|0|0|0|0|0|0|0|3]\n";
        let kf: KmerCountTable = decode(&mut Cursor::new(text)).unwrap();
        assert_eq!(kf.layout(), TableLayout::Windowed { num_lengths: 1 });
        assert_eq!(kf.count_kmer(b"AC").unwrap(), 1);
        assert_eq!(kf.count_kmer(b"TT").unwrap(), 3);
    }

    #[test]
    fn rejects_unknown_magic() {
        let err = decode::<u32, _>(&mut Cursor::new(b"#kfzip\n\x02\0\0\0".to_vec())).unwrap_err();
        assert!(matches!(err, KfreqError::Format(_)));
        let err = decode::<u32, _>(&mut Cursor::new(b"#kf".to_vec())).unwrap_err();
        assert!(matches!(err, KfreqError::Format(_)));
    }

    #[test]
    fn rejects_bad_text_records() {
        let cases = [
            // too few counts
            "#kftxt\n#Max k: 2\n1: [1|2|3]\n2: [0|0|0|0|0|0|0|0|0|0|0|0|0|0|0|0]\n",
            // too many counts
            "#kftxt\n#Max k: 2\n1: [1|2|3|4|5]\n2: [0|0|0|0|0|0|0|0|0|0|0|0|0|0|0|0]\n",
            // label mismatch
            "#kftxt\n#Max k: 2\n2: [1|2|3|4]\n2: [0|0|0|0|0|0|0|0|0|0|0|0|0|0|0|0]\n",
            // missing record
            "#kftxt\n#Max k: 2\n1: [1|2|3|4]\n",
            // not a number
            "#kftxt\n#Max k: 2\n1: [1|x|3|4]\n2: [0|0|0|0|0|0|0|0|0|0|0|0|0|0|0|0]\n",
            // unterminated
            "#kftxt\n#Max k: 2\n1: [1|2|3|4\n2: [0|0|0|0|0|0|0|0|0|0|0|0|0|0|0|0]\n",
            // k out of range
            "#kftxt\n#Max k: 17\n",
            "#kftxt\n#Max k: 1\n1: [1|2|3|4]\n",
            "#kftxt\nMax k = 2\n",
        ];
        for case in cases {
            let err = decode::<u32, _>(&mut Cursor::new(case)).unwrap_err();
            assert!(matches!(err, KfreqError::Format(_)), "{case:?} gave {err:?}");
        }
    }

    #[test]
    fn rejects_single_length_binary_header() {
        let mut buf = KF_BIN.to_vec();
        buf.extend_from_slice(&1u32.to_ne_bytes());
        buf.extend_from_slice(&[0u8; 16]);
        let err = decode::<u32, _>(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, KfreqError::Format(_)), "{err:?}");
    }

    #[test]
    fn rejects_overflowing_text_count() {
        let text = "#kftxt\n#Max k: 2\n1: [70000|0|0|0]\n2: [0|0|0|0|0|0|0|0|0|0|0|0|0|0|0|0]\n";
        assert!(decode::<u16, _>(&mut Cursor::new(text)).is_err());
        assert!(decode::<u32, _>(&mut Cursor::new(text)).is_ok());
    }

    #[test]
    fn rejects_truncated_binary() {
        let kf = sample(3);
        let mut buf = Vec::new();
        encode(&kf, &mut buf, TableFormat::Binary).unwrap();
        buf.truncate(buf.len() - 1);
        let err = decode::<u32, _>(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, KfreqError::Format(_)));
    }

    #[test]
    fn files_with_every_compression() {
        let dir = tempfile::tempdir().unwrap();
        let kf = sample(4);
        for compression in [Compression::None, Compression::Gzip, Compression::Zstd] {
            for format in [TableFormat::Binary, TableFormat::Text] {
                let path = dir.path().join(format!("t.{}.{:?}", format.extension(), compression));
                write_table_file(&path, &kf, format, compression).unwrap();
                let back: KmerCountTable = read_table_file(&path).unwrap();
                assert_same(&kf, &back);
            }
        }
    }

    #[test]
    fn unopenable_paths_name_the_file() {
        let err = read_table_file::<u32>(Path::new("/no/such/table.bin")).unwrap_err();
        assert!(err.to_string().contains("/no/such/table.bin"));
        let kf = sample(2);
        let err = write_table_file(
            Path::new("/no/such/dir/out.bin"),
            &kf,
            TableFormat::Binary,
            Compression::None,
        )
        .unwrap_err();
        assert!(matches!(err, KfreqError::Io { .. }));
    }
}
