use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, FnArg, ItemFn, Pat, ReturnType};

use cacheme_macro_utils::{generate_context_expr, generate_options_expr, parse_cacheme_attributes};

/// Caches a function through the installed `CacheMe` engine.
///
/// Every named parameter is bound into a `CallContext` under its own name
/// (receivers are not). The context is what the `key`, `invalidation_keys`
/// and `skip` closures receive. On the first call the policy is built and
/// registered against `CacheMe::global()`; later calls reuse it. When no
/// engine is installed the function body runs uncached.
///
/// Store failures never reach the caller: they are logged and the body's
/// result is returned uncached.
///
/// # Requirements
///
/// - **Arguments**: plain identifiers whose types implement `Serialize`
/// - **Return type**: `Serialize + DeserializeOwned + 'static`, naming
///   neither `Self` nor generic parameters of the function
/// - **Dependencies**: the calling crate must depend on `cacheme-core`
///
/// # Macro Parameters
///
/// - `key` (optional): closure `|ctx| -> String` building the key. The engine
///   prefix is prepended. Default: the name followed by the arguments as a
///   JSON array, as in `name:[1,"ada"]`. With the default key, calls whose
///   arguments cannot be encoded as JSON run uncached.
/// - `invalidation_keys` (optional): closure `|ctx| -> impl Into<TriggerKeys>`.
///   Runs after the body, so `ctx.result::<T>()` is available.
/// - `sources` (optional): iterable of `ChangeSource` to subscribe to.
/// - `tag` (optional): tag for the cached keys. Default: the name. Tags must
///   be unique across the engine, see below.
/// - `skip` (optional): `true`, `false` or a predicate `|ctx| -> bool`.
/// - `ttl` (optional): expiry in seconds of the bucket the key lives in.
/// - `on_hit` (optional): `|key, value, ctx|` called on every hit.
/// - `on_miss` (optional): `|key, ctx|` called before computing a miss.
/// - `name` (optional): registration name. Default: the function name.
///
/// # Names and tags
///
/// The default name is the bare function name, without its module path, and
/// the default tag is the name. Two cached functions with the same name in
/// different modules therefore claim the same tag. The first one called is
/// registered; the other fails registration with `DuplicateTag`, which is
/// logged once at `error` level, and from then on runs uncached. Give one of
/// them a distinct `name` or `tag`.
///
/// # Examples
///
/// ```ignore
/// use cacheme::{cacheme, ChangeSource};
///
/// #[cacheme(
///     key = |c| format!("User:{}:books", c.text("user_id")),
///     invalidation_keys = |c| format!("User:{}", c.text("user_id")),
///     sources = [ChangeSource::entity("User")],
///     ttl = 300
/// )]
/// fn user_books(user_id: u64) -> Vec<String> {
///     load_books(user_id)
/// }
/// ```
///
/// ## Conditional skipping
///
/// ```ignore
/// use cacheme::cacheme;
///
/// #[cacheme(skip = |c| c.arg::<bool>("fresh") == Some(true))]
/// fn report(day: String, fresh: bool) -> Report {
///     build_report(&day)
/// }
/// ```
#[proc_macro_attribute]
pub fn cacheme(attr: TokenStream, item: TokenStream) -> TokenStream {
    let attrs = match parse_cacheme_attributes(attr.into()) {
        Ok(attrs) => attrs,
        Err(err) => return err.into(),
    };

    let input = parse_macro_input!(item as ItemFn);
    let fn_attrs = &input.attrs;
    let vis = &input.vis;
    let sig = &input.sig;
    let ident = &sig.ident;
    let block = &input.block;

    if sig.asyncness.is_some() {
        return quote! { compile_error!("#[cacheme] does not support async functions"); }.into();
    }

    let ret_type: TokenStream2 = match &sig.output {
        ReturnType::Type(_, ty) => quote! { #ty },
        ReturnType::Default => quote! { () },
    };

    let mut args = Vec::new();
    for arg in sig.inputs.iter() {
        match arg {
            FnArg::Receiver(_) => {}
            FnArg::Typed(pat_type) => match &*pat_type.pat {
                Pat::Ident(pat_ident) => args.push(pat_ident.ident.clone()),
                _ => {
                    return quote! {
                        compile_error!("#[cacheme] arguments must be plain identifiers");
                    }
                    .into()
                }
            },
        }
    }

    let name = attrs.custom_name.clone().unwrap_or_else(|| ident.to_string());
    let context_expr = generate_context_expr(&args);
    let options_expr = generate_options_expr(&attrs, &ret_type);

    let expanded = quote! {
        #(#fn_attrs)*
        #vis #sig {
            static __CACHEME_POLICY: ::cacheme_core::__private::PolicyCell<#ret_type> =
                ::cacheme_core::__private::OnceCell::new();

            let __ctx = #context_expr;
            ::cacheme_core::__private::run_cached(
                &__CACHEME_POLICY,
                #name,
                || #options_expr,
                __ctx,
                move |_: &::cacheme_core::CallContext| -> #ret_type #block,
            )
        }
    };

    TokenStream::from(expanded)
}
