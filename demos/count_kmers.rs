use kfreq::*;

fn main() -> Result<()> {
    let filename = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "genome.fa".to_string());
    let k = 4;

    let mut kmer_counter: KmerCountTable = KmerCountTable::new(k)?;

    let summary = count_kmers_file(&mut kmer_counter, std::path::Path::new(&filename))?;
    println!("Sequences: {}, bases: {}", summary.sequences, summary.bases);

    kmer_counter.rc_collapse();
    let profile = z_scores(&kmer_counter)?;

    let mut ranked: Vec<(u32, f64)> = profile
        .values()
        .iter()
        .enumerate()
        .map(|(i, z)| (i as u32, *z))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    for (kmer, z) in ranked.iter().take(10) {
        println!(
            "{}\t{}\t{:.3}",
            decode_kmer(*kmer, k),
            kmer_counter.count(k, *kmer).unwrap_or(0),
            z
        );
    }
    Ok(())
}
