//! Shared utilities for cacheme procedural macros
//!
//! Attribute parsing and code generation used by `cacheme-macros`. Errors are
//! returned as `compile_error!` token streams so they surface at the
//! attribute's call site.

use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{punctuated::Punctuated, Expr, Ident, Lit, MetaNameValue, Token};

/// Parsed `#[cacheme(...)]` attributes
#[derive(Default)]
pub struct CacheMeAttributes {
    pub key: Option<Expr>,
    pub invalidation_keys: Option<Expr>,
    pub sources: Option<Expr>,
    pub tag: Option<String>,
    pub skip: Option<TokenStream2>,
    pub ttl: Option<u64>,
    pub on_hit: Option<Expr>,
    pub on_miss: Option<Expr>,
    pub custom_name: Option<String>,
}

fn error(msg: &str) -> TokenStream2 {
    quote! { compile_error!(#msg) }
}

/// Parse a string literal attribute such as `tag` or `name`
pub fn parse_str_attribute(nv: &MetaNameValue, attr: &str) -> Result<String, TokenStream2> {
    match &nv.value {
        Expr::Lit(expr_lit) => match &expr_lit.lit {
            Lit::Str(s) => Ok(s.value()),
            _ => Err(error(&format!(
                "Invalid literal for `{attr}`: expected string"
            ))),
        },
        _ => Err(error(&format!(
            "Invalid syntax for `{attr}`: expected `{attr} = \"...\"`"
        ))),
    }
}

/// Parse the `ttl` attribute (seconds)
pub fn parse_ttl_attribute(nv: &MetaNameValue) -> Result<u64, TokenStream2> {
    match &nv.value {
        Expr::Lit(expr_lit) => match &expr_lit.lit {
            Lit::Int(lit_int) => lit_int
                .base10_parse::<u64>()
                .map_err(|_| error("ttl must be a positive integer (seconds)")),
            _ => Err(error(
                "Invalid literal for `ttl`: expected integer (seconds)",
            )),
        },
        _ => Err(error("Invalid syntax for `ttl`: expected `ttl = <integer>`")),
    }
}

/// Parse the `skip` attribute: a boolean literal or a predicate over the
/// call context
pub fn parse_skip_attribute(nv: &MetaNameValue) -> TokenStream2 {
    match &nv.value {
        Expr::Lit(expr_lit) => match &expr_lit.lit {
            Lit::Bool(b) => {
                let value = b.value;
                quote! { ::cacheme_core::Skip::from(#value) }
            }
            _ => error("Invalid literal for `skip`: expected `true`, `false` or a predicate"),
        },
        predicate => quote! { ::cacheme_core::Skip::when(#predicate) },
    }
}

/// Parse cacheme attributes from a token stream
pub fn parse_cacheme_attributes(attr: TokenStream2) -> Result<CacheMeAttributes, TokenStream2> {
    use syn::parse::Parser;

    let parser = Punctuated::<MetaNameValue, Token![,]>::parse_terminated;
    let parsed_args = parser.parse2(attr).map_err(|e| {
        let msg = format!("Failed to parse attributes: {}", e);
        quote! { compile_error!(#msg) }
    })?;

    let mut attrs = CacheMeAttributes::default();

    for nv in parsed_args {
        let Some(name) = nv.path.get_ident().map(ToString::to_string) else {
            return Err(error("Invalid attribute: expected `name = value`"));
        };
        match name.as_str() {
            "key" => attrs.key = Some(nv.value),
            "invalidation_keys" => attrs.invalidation_keys = Some(nv.value),
            "sources" => attrs.sources = Some(nv.value),
            "on_hit" => attrs.on_hit = Some(nv.value),
            "on_miss" => attrs.on_miss = Some(nv.value),
            "tag" => attrs.tag = Some(parse_str_attribute(&nv, "tag")?),
            "name" => attrs.custom_name = Some(parse_str_attribute(&nv, "name")?),
            "ttl" => attrs.ttl = Some(parse_ttl_attribute(&nv)?),
            "skip" => attrs.skip = Some(parse_skip_attribute(&nv)),
            other => {
                return Err(error(&format!(
                    "Unknown attribute `{other}`: expected one of key, invalidation_keys, \
                     sources, tag, skip, ttl, on_hit, on_miss, name"
                )))
            }
        }
    }

    Ok(attrs)
}

/// Generate the `CallContext` binding every argument under its own name
pub fn generate_context_expr(args: &[Ident]) -> TokenStream2 {
    let names = args.iter().map(|ident| ident.to_string());
    quote! {
        ::cacheme_core::CallContext::new()
            #( .with(#names, &#args) )*
    }
}

/// Generate the `CacheOptions` expression for the parsed attributes
pub fn generate_options_expr(attrs: &CacheMeAttributes, ret_type: &TokenStream2) -> TokenStream2 {
    let base = match &attrs.key {
        Some(key) => quote! { ::cacheme_core::CacheOptions::<#ret_type>::new(#key) },
        None => quote! { ::cacheme_core::CacheOptions::<#ret_type>::default_key() },
    };

    let mut calls = Vec::new();
    if let Some(builder) = &attrs.invalidation_keys {
        calls.push(quote! { .invalidation_keys(#builder) });
    }
    if let Some(sources) = &attrs.sources {
        calls.push(quote! { .sources(#sources) });
    }
    if let Some(tag) = &attrs.tag {
        calls.push(quote! { .tag(#tag) });
    }
    if let Some(skip) = &attrs.skip {
        calls.push(quote! { .skip(#skip) });
    }
    if let Some(ttl) = attrs.ttl {
        calls.push(quote! { .ttl(::std::time::Duration::from_secs(#ttl)) });
    }
    if let Some(hook) = &attrs.on_hit {
        calls.push(quote! { .on_hit(#hook) });
    }
    if let Some(hook) = &attrs.on_miss {
        calls.push(quote! { .on_miss(#hook) });
    }

    quote! { #base #(#calls)* }
}
