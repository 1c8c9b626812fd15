//! `include_zstd!("path")` embeds a zstd-compressed copy of a file as a `&[u8]`.
//!
//! Paths are relative to the calling crate's manifest directory. An optional
//! compression level can be passed as a second argument:
//! `include_zstd!("assets/viewer.html", 22)`.

use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use std::env;
use std::fs;
use std::path::PathBuf;
use syn::parse::{Parse, ParseStream};
use syn::{Error, LitByteStr, LitInt, LitStr, Token, parse_macro_input};

const DEFAULT_LEVEL: i32 = 19;

macro_rules! bail {
    ($call:expr) => {
        match $call {
            Ok(val) => val,
            Err(err) => return Error::new(Span::call_site(), err).to_compile_error().into(),
        }
    };
}

struct IncludeArgs {
    path: LitStr,
    level: i32,
}

impl Parse for IncludeArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let path: LitStr = input.parse()?;
        let level = if input.peek(Token![,]) {
            input.parse::<Token![,]>()?;
            if input.is_empty() {
                DEFAULT_LEVEL
            } else {
                input.parse::<LitInt>()?.base10_parse::<i32>()?
            }
        } else {
            DEFAULT_LEVEL
        };
        if !(1..=22).contains(&level) {
            return Err(Error::new(
                path.span(),
                format!("zstd level must be within 1..=22, got {level}"),
            ));
        }
        Ok(Self { path, level })
    }
}

#[proc_macro]
pub fn include_zstd(input: TokenStream) -> TokenStream {
    let IncludeArgs { path, level } = parse_macro_input!(input as IncludeArgs);
    let file_path = path.value();

    let manifest_dir = bail!(env::var("CARGO_MANIFEST_DIR"));
    let full_path = PathBuf::from(manifest_dir).join(&file_path);

    let content = bail!(
        fs::read(&full_path).map_err(|e| format!("{}: {e}", full_path.display()))
    );

    let compressed_data = bail!(zstd::stream::encode_all(&content[..], level));

    let literal_bytes = LitByteStr::new(&compressed_data, Span::call_site());
    let tracked = full_path.to_string_lossy().into_owned();

    // The unused include_bytes! makes cargo rebuild when the asset changes.
    let output = quote!({
        const _: &[u8] = include_bytes!(#tracked);
        #literal_bytes
    });

    output.into()
}
