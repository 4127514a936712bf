//! Procedural macros for epickit

use darling::{FromDeriveInput, FromVariant};
use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput};

/// Container-level attributes for #[derive(ActionKind)]
#[derive(Debug, FromDeriveInput)]
#[darling(attributes(action_kind), supports(enum_any))]
struct ActionKindOpts {
    ident: syn::Ident,
    generics: syn::Generics,
    data: darling::ast::Data<ActionKindVariant, ()>,

    /// Prepended to every generated name, e.g. `"counter/"`
    #[darling(default)]
    prefix: Option<String>,

    /// Path to the epickit crate (defaults to `::epickit`)
    #[darling(default, rename = "crate")]
    krate: Option<syn::Path>,
}

/// Variant-level attributes
#[derive(Debug, FromVariant)]
#[darling(attributes(action_kind))]
struct ActionKindVariant {
    ident: syn::Ident,
    fields: darling::ast::Fields<()>,

    /// Explicit name, used instead of the snake_case variant name
    #[darling(default)]
    rename: Option<String>,
}

/// Convert PascalCase to snake_case
fn to_snake_case(s: &str) -> String {
    let mut result = String::new();
    for (i, ch) in s.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.extend(ch.to_lowercase());
        } else {
            result.push(ch);
        }
    }
    result
}

/// Derive macro for the ActionKind trait
///
/// Turns a fieldless enum into a closed set of action types. Each variant
/// maps to an `ActionType` named after the variant in snake_case.
///
/// Generates:
/// - `impl ActionKind` returning the variant's `ActionType`
/// - `impl From<Enum> for ActionType`, so variants can be passed wherever
///   an action type is expected
/// - `Enum::ALL`, every variant in declaration order
///
/// # Attributes
///
/// - `#[action_kind(prefix = "counter/")]` on the enum prefixes every name
/// - `#[action_kind(rename = "go")]` on a variant overrides its name
/// - `#[action_kind(crate = "epickit_core")]` sets the path to the runtime crate
///
/// # Example
/// ```ignore
/// #[derive(ActionKind, Clone, Copy, Debug, PartialEq, Eq)]
/// #[action_kind(prefix = "counter/")]
/// enum CounterAction {
///     StartCounting,
///     Increment,
///     #[action_kind(rename = "halt")]
///     Stop,
/// }
///
/// assert_eq!(CounterAction::StartCounting.action_type().name(), "counter/start_counting");
/// assert_eq!(CounterAction::Stop.action_type().name(), "counter/halt");
/// let increment = create_action::<State>(CounterAction::Increment).reducer(|s| s.inc());
/// ```
#[proc_macro_derive(ActionKind, attributes(action_kind))]
pub fn derive_action_kind(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let opts = match ActionKindOpts::from_derive_input(&input) {
        Ok(opts) => opts,
        Err(e) => return e.write_errors().into(),
    };

    if !opts.generics.params.is_empty() {
        return syn::Error::new_spanned(&opts.generics, "ActionKind cannot be derived for generic enums")
            .to_compile_error()
            .into();
    }

    let name = &opts.ident;
    let krate = opts
        .krate
        .clone()
        .unwrap_or_else(|| syn::parse_quote!(::epickit));
    let prefix = opts.prefix.clone().unwrap_or_default();

    let variants = match &opts.data {
        darling::ast::Data::Enum(variants) => variants,
        _ => {
            return syn::Error::new_spanned(&input, "ActionKind can only be derived for enums")
                .to_compile_error()
                .into();
        }
    };

    let mut errors = darling::Error::accumulator();
    for v in variants {
        if !matches!(v.fields.style, darling::ast::Style::Unit) {
            errors.push(
                darling::Error::custom("ActionKind variants cannot carry fields; put data in the payload")
                    .with_span(&v.ident),
            );
        }
    }
    if let Err(e) = errors.finish() {
        return e.write_errors().into();
    }

    let mut seen = std::collections::HashSet::new();
    let mut type_arms = Vec::with_capacity(variants.len());
    for v in variants {
        let variant_name = &v.ident;
        let type_name = format!(
            "{}{}",
            prefix,
            v.rename
                .clone()
                .unwrap_or_else(|| to_snake_case(&variant_name.to_string()))
        );
        if !seen.insert(type_name.clone()) {
            let msg = format!("duplicate action type name `{}`", type_name);
            return syn::Error::new_spanned(variant_name, msg)
                .to_compile_error()
                .into();
        }
        type_arms.push(quote! {
            #name::#variant_name => #krate::ActionType::new(#type_name)
        });
    }

    let all_variants = variants.iter().map(|v| {
        let variant_name = &v.ident;
        quote! { #name::#variant_name }
    });

    let all_doc = format!("Every [`{}`] variant, in declaration order.", name);

    let expanded = quote! {
        impl #krate::ActionKind for #name {
            fn action_type(&self) -> #krate::ActionType {
                match self {
                    #(#type_arms),*
                }
            }
        }

        impl ::core::convert::From<#name> for #krate::ActionType {
            fn from(kind: #name) -> Self {
                #krate::ActionKind::action_type(&kind)
            }
        }

        impl #name {
            #[doc = #all_doc]
            pub const ALL: &'static [#name] = &[#(#all_variants),*];
        }
    };

    TokenStream::from(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_snake_case() {
        assert_eq!(to_snake_case("StartCounting"), "start_counting");
        assert_eq!(to_snake_case("Increment"), "increment");
        assert_eq!(to_snake_case("DidLoadData"), "did_load_data");
    }
}
