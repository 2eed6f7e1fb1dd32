//! Procedural macros for strand.
//!
//! This crate is re-exported by `strand`; depend on `strand` and write
//! `#[strand::coroutine]`.

use proc_macro::TokenStream;
use quote::quote;
use syn::{
    Error, GenericArgument, ItemFn, LitStr, PathArguments, ReturnType, Type, parse_macro_input,
    parse_quote,
};

/// Turns an `async fn` into a function that runs its body as a task.
///
/// ```rust,ignore
/// #[strand::coroutine]
/// async fn total(a: Deferred<u32>, b: Deferred<u32>) -> strand::Result<u32> {
///     Ok(a.await? + b.await?)
/// }
///
/// // Expands to a plain function:
/// // fn total(a: Deferred<u32>, b: Deferred<u32>) -> strand::Result<Inline<u32>>
/// ```
///
/// The body runs synchronously up to its first `.await` on a pending
/// deferred. If it finishes without suspending, the caller gets
/// `Ok(Inline::Ready(value))` (or the error); otherwise it gets
/// `Ok(Inline::Pending(deferred))`.
///
/// The function must return `Result<T>` (strand's alias) or
/// `Result<T, Error>`, and its arguments are moved into the task, so they
/// must be `Send + 'static`.
#[proc_macro_attribute]
pub fn coroutine(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        return Error::new(
            proc_macro2::Span::call_site(),
            "#[strand::coroutine] takes no arguments",
        )
        .to_compile_error()
        .into();
    }

    let input = parse_macro_input!(item as ItemFn);

    let attrs = &input.attrs;
    let vis = &input.vis;
    let block = &input.block;

    if input.sig.asyncness.is_none() {
        return Error::new_spanned(
            input.sig.fn_token,
            "#[strand::coroutine] must be used on an async function",
        )
        .to_compile_error()
        .into();
    }

    let output = match success_type(&input.sig.output) {
        Ok(ty) => ty,
        Err(error) => return error.to_compile_error().into(),
    };

    let mut sig = input.sig.clone();
    sig.asyncness = None;
    sig.output = parse_quote!(-> ::strand::Result<::strand::task::Inline<#output>>);

    let name = LitStr::new(&sig.ident.to_string(), sig.ident.span());

    quote! {
        #(#attrs)*
        #vis #sig {
            ::strand::task::run(::strand::task::AsyncStep::named(
                #name,
                async move #block,
            ))
        }
    }
    .into()
}

/// Extracts `T` from a `-> Result<T>` or `-> Result<T, E>` return type.
fn success_type(output: &ReturnType) -> syn::Result<Type> {
    let ReturnType::Type(_, ty) = output else {
        return Err(Error::new_spanned(
            output,
            "#[strand::coroutine] functions must return strand::Result<T>",
        ));
    };

    if let Type::Path(path) = ty.as_ref() {
        if let Some(segment) = path.path.segments.last() {
            if segment.ident == "Result" {
                if let PathArguments::AngleBracketed(arguments) = &segment.arguments {
                    if let Some(GenericArgument::Type(success)) = arguments.args.first() {
                        return Ok(success.clone());
                    }
                }
            }
        }
    }

    Err(Error::new_spanned(
        ty,
        "#[strand::coroutine] functions must return strand::Result<T>",
    ))
}
