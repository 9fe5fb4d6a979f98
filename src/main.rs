#![cfg_attr(feature = "strict", deny(warnings))]
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::ProgressBar;
use itertools::Itertools;
use log::info;
use rand::Rng;
use rug::integer::Order;
use rug::Integer;
use time::Duration;
use uom::si::information::byte;

use setproof::accumulator::RsaAccumulator;
use setproof::artifacts::Artifacts;
use setproof::merkle::Tree;
use setproof::util::{DataSized, Information};
use setproof::RsaGroup;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accumulate a random data set and compare Merkle and RSA proofs.
    Generate(GenerateArgs),
    /// Check every proof in a bundle written by `generate --output`.
    Verify {
        /// Path to the bundle (JSON).
        path: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct GenerateArgs {
    /// Number of random elements.
    #[clap(long, env = "RANDOM_LIST_SIZE", default_value = "100")]
    size: usize,
    /// Maximum bit length of each random element.
    #[clap(long, env = "RANDOM_LIST_MAXIMUM_LENGTH", default_value = "256")]
    max_bits: u32,
    /// Index of the element to prove on its own.
    #[clap(long, env = "SINGLE_PROVE_INDEX", default_value = "0")]
    single_index: usize,
    /// Batch-prove the elements with indices below this.
    #[clap(long, env = "BATCH_PROVE_SIZE", default_value = "10")]
    batch_size: usize,
    /// Bit length of the prime representatives.
    #[clap(long, env = "HASH_TO_PRIME_LENGTH", default_value = "256")]
    prime_bits: u32,
    /// Where to write the bundle of public values and proofs.
    #[clap(long)]
    output: Option<PathBuf>,
}

/// A random integer in `[1, 2^max_bits)`, as a decimal string.
fn random_element<R: Rng>(rng: &mut R, max_bits: u32) -> String {
    let mut bytes = vec![0u8; usize::try_from((max_bits + 7) / 8).expect("small")];
    loop {
        rng.fill(&mut bytes[..]);
        let mut value = Integer::from_digits(&bytes, Order::Msf);
        value.keep_bits_mut(max_bits);
        if value != 0 {
            return value.to_string();
        }
    }
}

fn bytes(size: Information) -> u64 {
    size.get::<byte>()
}

fn generate(args: GenerateArgs) -> Result<()> {
    if args.max_bits == 0 {
        bail!("elements need at least one bit");
    }
    if args.max_bits < 64 && (1u64 << args.max_bits) - 1 < args.size as u64 {
        bail!(
            "can't pick {} distinct elements of at most {} bits",
            args.size,
            args.max_bits
        );
    }
    if args.single_index >= args.size {
        bail!(
            "single prove index {} is out of range for {} elements",
            args.single_index,
            args.size
        );
    }
    if args.batch_size > args.size {
        bail!(
            "batch size {} is larger than the data set ({})",
            args.batch_size,
            args.size
        );
    }

    let mut rng = rand::thread_rng();
    let elements: Vec<String> = std::iter::repeat_with(|| random_element(&mut rng, args.max_bits))
        .unique()
        .take(args.size)
        .collect();
    println!("Random list size: {}", args.size);
    println!(
        "Later at the batch checking stage, we will batch check {} elements.",
        args.batch_size
    );

    let group = RsaGroup::rsa2048();
    let (add_time, accumulator) = Duration::time_fn(|| {
        RsaAccumulator::import(group.clone(), args.prime_bits, &elements)
    });
    let accumulator = accumulator.context("accumulating the data set")?;
    println!("RSA accumulator batch add done, which takes {add_time}");

    let (build_time, tree) = Duration::time_fn(|| Tree::<sha2::Sha256>::build(&elements));
    let tree = tree.context("building the Merkle tree")?;
    let root = tree.root();
    println!("Merkle tree add leaves done, which takes {build_time}");
    println!("Merkle tree root: 0x{}\n", hex::encode(root.as_bytes()));

    let digest = accumulator.digest().clone();
    let checked = elements[args.single_index].as_bytes();
    println!(
        "Checking single element with index {}: {}\n",
        args.single_index, elements[args.single_index]
    );

    let (prove_time, witness) = Duration::time_fn(|| accumulator.prove(checked));
    let witness = witness?;
    let (verify_time, member) =
        Duration::time_fn(|| digest.verify(&witness.witness, &witness.prime.prime));
    println!(
        "Single element check. Using RSA accumulator.\nMember? {}.\nGenerating proof takes {prove_time}.\nVerifying takes {verify_time}.\nProof size: {} bytes.\n",
        member?,
        bytes(witness.size()),
    );

    let (prove_time, proof) = Duration::time_fn(|| tree.prove(args.single_index));
    let proof = proof.context("no Merkle proof for the checked index")?;
    let (verify_time, member) = Duration::time_fn(|| root.verify(checked, &proof));
    println!(
        "Single element check. Using Merkle tree validation.\nMember? {member}.\nGenerating proof takes {prove_time}.\nVerifying takes {verify_time}.\nProof size: {} bytes.\n",
        bytes(proof.size()),
    );

    if args.batch_size > 0 {
        let batch = &elements[..args.batch_size];
        println!(
            "Now check a group of elements with indices [0, {}]\n",
            args.batch_size - 1
        );
        let per_element = args.batch_size as f64;

        let (prove_time, witness) = Duration::time_fn(|| accumulator.aggregate(batch));
        let witness = witness?;
        let (verify_time, member) =
            Duration::time_fn(|| digest.verify_product(&witness.witness, &witness.product));
        println!(
            "Batch check. Using RSA accumulator.\nMember? {}.\nGenerating proof takes {prove_time} ({} per checked element).\nVerifying takes {verify_time} ({} per checked element).\nProof size: {} bytes.\n",
            member?,
            prove_time / per_element,
            verify_time / per_element,
            bytes(witness.size()),
        );

        let progress = ProgressBar::new(args.batch_size as u64);
        let mut prove_time = Duration::ZERO;
        let mut verify_time = Duration::ZERO;
        let mut size = Information::new::<byte>(0);
        let mut member = true;
        for (index, element) in batch.iter().enumerate() {
            let (elapsed, proof) = Duration::time_fn(|| tree.prove(index));
            let proof = proof.context("no Merkle proof for a batch index")?;
            prove_time += elapsed;
            size += proof.size();
            let (elapsed, valid) = Duration::time_fn(|| root.verify(element.as_bytes(), &proof));
            verify_time += elapsed;
            member &= valid;
            progress.inc(1);
        }
        progress.finish_and_clear();
        println!(
            "Batch check. Using Merkle tree validation.\nMember? {member}.\nGenerating proof takes {prove_time} ({} per checked element).\nVerifying takes {verify_time} ({} per checked element).\nProof size: {} bytes.\n",
            prove_time / per_element,
            verify_time / per_element,
            bytes(size),
        );
    }

    if let Some(path) = args.output {
        let indices: Vec<usize> = (0..args.batch_size).collect();
        let artifacts = Artifacts::generate(group, args.prime_bits, &elements, &indices)
            .context("generating artifacts")?;
        fs::write(&path, artifacts.to_json()?)
            .with_context(|| format!("writing {}", path.display()))?;
        info!("wrote artifacts to {}", path.display());
    }
    Ok(())
}

fn verify(path: PathBuf) -> Result<()> {
    let json =
        fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    let artifacts = Artifacts::from_json(&json).context("parsing artifacts")?;
    let (verify_time, report) = Duration::time_fn(|| artifacts.verify());
    let report = report.context("malformed artifacts")?;
    println!(
        "Checked {} elements in {verify_time}.",
        artifacts.elements.len()
    );
    println!("Merkle failures: {:?}", report.merkle_failures);
    println!("RSA accumulator failures: {:?}", report.rsa_failures);
    if let Some(batch) = report.batch {
        println!("Batch valid? {batch}");
    }
    if !report.is_ok() {
        bail!("some proofs did not verify");
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    match args.command {
        Command::Generate(args) => generate(args),
        Command::Verify { path } => verify(path),
    }
}
